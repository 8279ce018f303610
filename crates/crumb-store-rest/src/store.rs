//! [`RestStore`]: the HTTP implementation of [`KvStore`].

use crumb_core::store::{KvStore, ScanPage};
use reqwest::Client;
use serde_json::Value;

use crate::{
  Error, Result,
  protocol::{Reply, decode_del, decode_get, decode_ok, decode_scan},
};

/// Connection settings for the store's REST endpoint.
#[derive(Debug, Clone)]
pub struct RestConfig {
  pub url:   String,
  pub token: String,
}

/// Async client for a Redis-compatible REST endpoint.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based. No
/// client-wide timeout is set: callers bound each call themselves.
#[derive(Clone)]
pub struct RestStore {
  client: Client,
  config: RestConfig,
}

impl RestStore {
  /// Build a client. Both the URL and the token are required.
  pub fn new(config: RestConfig) -> Result<Self> {
    if config.url.trim().is_empty() {
      return Err(Error::MissingCredentials("url"));
    }
    if config.token.trim().is_empty() {
      return Err(Error::MissingCredentials("token"));
    }
    let client = Client::builder().build()?;
    Ok(Self { client, config })
  }

  /// POST one command and unwrap the reply envelope.
  async fn command(&self, args: &[&str]) -> Result<Value> {
    let verb = args.first().copied().unwrap_or_default();
    tracing::trace!(command = verb, "kv command");

    let resp = self
      .client
      .post(self.config.url.trim_end_matches('/'))
      .bearer_auth(&self.config.token)
      .json(args)
      .send()
      .await?;

    let status = resp.status();
    let body = resp.text().await?;

    // Command errors come back as 400 with a JSON envelope; anything that
    // does not parse is a transport-level failure.
    match serde_json::from_str::<Reply>(&body) {
      Ok(reply) if status.is_success() || reply.error.is_some() => reply.into_result(),
      _ => Err(Error::Status {
        status: status.as_u16(),
        body,
      }),
    }
  }
}

// ─── KvStore impl ────────────────────────────────────────────────────────────

impl KvStore for RestStore {
  type Error = Error;

  async fn get(&self, key: &str) -> Result<Option<String>> {
    decode_get(self.command(&["GET", key]).await?)
  }

  async fn set(&self, key: &str, value: &str) -> Result<()> {
    decode_ok("SET", self.command(&["SET", key, value]).await?)
  }

  async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
    let ttl = ttl_secs.to_string();
    decode_ok("SETEX", self.command(&["SETEX", key, &ttl, value]).await?)
  }

  async fn del(&self, key: &str) -> Result<bool> {
    decode_del(self.command(&["DEL", key]).await?)
  }

  async fn scan(&self, cursor: &str, pattern: &str, count: usize) -> Result<ScanPage> {
    let count = count.max(1).to_string();
    decode_scan(
      self
        .command(&["SCAN", cursor, "MATCH", pattern, "COUNT", &count])
        .await?,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn credentials_are_required() {
    let missing_token = RestStore::new(RestConfig {
      url:   "https://kv.example.com".into(),
      token: " ".into(),
    });
    assert!(matches!(missing_token, Err(Error::MissingCredentials("token"))));

    let missing_url = RestStore::new(RestConfig {
      url:   String::new(),
      token: "t".into(),
    });
    assert!(matches!(missing_url, Err(Error::MissingCredentials("url"))));
  }

  #[tokio::test]
  async fn unreachable_store_is_an_http_error() {
    let store = RestStore::new(RestConfig {
      url:   "http://127.0.0.1:9".into(),
      token: "t".into(),
    })
    .unwrap();
    assert!(matches!(store.get("k").await, Err(Error::Http(_))));
  }
}
