//! [`KvClient`]: the engine's only path to the store.
//!
//! Every call is bounded by a timeout, every value is decoded the same way,
//! and writes that matter are verified by reading them back.

use std::{future::Future, sync::Arc, time::Duration};

use crumb_core::store::{KvStore, ScanPage};
use futures::{StreamExt, stream};
use percent_encoding::percent_decode_str;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Some writers store URL-encoded JSON. A value that does not already look
/// like JSON is percent-decoded before parsing.
pub fn decode_value(raw: String) -> String {
  let trimmed = raw.trim_start();
  if trimmed.starts_with(['{', '[', '"']) || !raw.contains('%') {
    return raw;
  }
  percent_decode_str(&raw).decode_utf8_lossy().into_owned()
}

pub struct KvClient<S> {
  store:   Arc<S>,
  timeout: Duration,
}

impl<S> Clone for KvClient<S> {
  fn clone(&self) -> Self {
    Self {
      store:   Arc::clone(&self.store),
      timeout: self.timeout,
    }
  }
}

impl<S: KvStore> KvClient<S> {
  pub fn new(store: Arc<S>, timeout: Duration) -> Self { Self { store, timeout } }

  async fn bounded<T, F>(&self, op: &'static str, key: &str, call: F) -> Result<T>
  where
    F: Future<Output = Result<T, S::Error>>,
  {
    match tokio::time::timeout(self.timeout, call).await {
      Ok(Ok(v)) => Ok(v),
      Ok(Err(e)) => Err(Error::Store(Box::new(e))),
      Err(_) => Err(Error::Timeout {
        op,
        key: key.to_owned(),
        timeout: self.timeout,
      }),
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// Raw value, percent-decoded where needed.
  pub async fn get(&self, key: &str) -> Result<Option<String>> {
    let raw = self.bounded("GET", key, self.store.get(key)).await?;
    Ok(raw.map(decode_value))
  }

  /// A present value that fails to parse is an error, not `None`.
  pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.get(key).await? {
      Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      None => Ok(None),
    }
  }

  /// Fetch many keys with at most `concurrency` calls in flight. Results come
  /// back in input order; each key succeeds or fails on its own.
  pub async fn get_many<T: DeserializeOwned>(
    &self,
    keys: &[String],
    concurrency: usize,
  ) -> Vec<(String, Result<Option<T>>)> {
    stream::iter(keys)
      .map(|key| async move { (key.clone(), self.get_json::<T>(key).await) })
      .buffered(concurrency.max(1))
      .collect()
      .await
  }

  pub async fn scan(&self, cursor: &str, pattern: &str, count: usize) -> Result<ScanPage> {
    self
      .bounded("SCAN", pattern, self.store.scan(cursor, pattern, count))
      .await
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  pub async fn setex_json<T: Serialize>(&self, key: &str, ttl_secs: u64, value: &T) -> Result<()> {
    let body = serde_json::to_string(value)?;
    self
      .bounded("SETEX", key, self.store.setex(key, ttl_secs, &body))
      .await
  }

  /// Write without expiry, then read back. An acknowledged write that is not
  /// there afterwards is [`Error::WriteVerification`].
  pub async fn set_verified<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let body = serde_json::to_string(value)?;
    self.bounded("SET", key, self.store.set(key, &body)).await?;
    self.verify(key).await
  }

  /// [`Self::set_verified`] with a TTL.
  pub async fn setex_verified<T: Serialize>(
    &self,
    key: &str,
    ttl_secs: u64,
    value: &T,
  ) -> Result<()> {
    let body = serde_json::to_string(value)?;
    self
      .bounded("SETEX", key, self.store.setex(key, ttl_secs, &body))
      .await?;
    self.verify(key).await
  }

  async fn verify(&self, key: &str) -> Result<()> {
    match self.bounded("GET", key, self.store.get(key)).await? {
      Some(_) => Ok(()),
      None => {
        tracing::error!(key, "write acknowledged but missing on read-back");
        Err(Error::WriteVerification { key: key.to_owned() })
      }
    }
  }
}
