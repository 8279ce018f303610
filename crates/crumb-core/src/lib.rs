//! Core types and pure algorithms for the Crumb attribution engine.
//!
//! This crate is deliberately free of network and database dependencies.
//! Everything here is deterministic: record normalization, key layout, index
//! accumulation, journey assembly and the attribution calculator. Storage
//! backends implement [`store::KvStore`]; orchestration lives in
//! `crumb-engine`.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod attribution;
pub mod error;
pub mod event;
pub mod index;
pub mod journey;
pub mod keys;
pub mod normalize;
pub mod progress;
pub mod store;

pub use error::{Error, Result};
