//! Error type for `crumb-store-rest`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("missing store credential: {0}")]
  MissingCredentials(&'static str),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("store returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("store rejected command: {0}")]
  Server(String),

  #[error("unexpected reply to {command}: {detail}")]
  Protocol {
    command: &'static str,
    detail:  String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
