//! Error type for `crumb-engine`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("{op} {key:?} timed out after {timeout:?}")]
  Timeout {
    op:      &'static str,
    key:     String,
    timeout: Duration,
  },

  #[error("core error: {0}")]
  Core(#[from] crumb_core::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The store accepted a write but the value was not there on read-back.
  #[error("write to {key:?} did not read back; the store may be dropping data")]
  WriteVerification { key: String },

  #[error("configuration error: {0}")]
  Config(String),
}

impl Error {
  /// Failures that end a batch job rather than degrading one record.
  pub fn is_job_fatal(&self) -> bool {
    matches!(self, Self::WriteVerification { .. } | Self::Config(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
