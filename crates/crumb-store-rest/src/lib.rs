//! Network backend for the Crumb key-value store abstraction.
//!
//! Speaks the Redis-over-HTTP command protocol: every command is a JSON array
//! POSTed to the store's base URL with a bearer token, and every reply is
//! `{"result": ...}` or `{"error": "..."}`.

mod protocol;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{RestConfig, RestStore};
