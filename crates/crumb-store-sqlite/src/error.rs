//! Error type for `crumb-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("invalid scan cursor: {0:?}")]
  InvalidCursor(String),

  #[error("ttl of {0} seconds is out of range")]
  InvalidTtl(u64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
