//! Error types for `crumb-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("record is not a JSON object")]
  NotAnObject,

  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("invalid value for {field}: {reason}")]
  InvalidField {
    field:  &'static str,
    reason: String,
  },

  #[error("order total must be non-negative, got {0}")]
  NegativeOrderTotal(f64),

  #[error("half-life must be a positive number of hours, got {0}")]
  InvalidHalfLife(f64),

  #[error("invalid resume token: {0:?}")]
  InvalidResumeToken(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
