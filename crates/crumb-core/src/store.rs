//! The `KvStore` trait.
//!
//! The trait is implemented by storage backends (`crumb-store-sqlite`,
//! `crumb-store-rest`). The engine depends on this abstraction, not on any
//! concrete backend. It mirrors the Redis command subset the attribution
//! engine needs: string values, optional TTLs and cursor-based `SCAN`.

use std::future::Future;

/// Cursor value that starts a scan and, when returned, ends it.
pub const SCAN_TERMINAL: &str = "0";

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
  /// Cursor for the next call; [`SCAN_TERMINAL`] when iteration is finished.
  pub cursor: String,
  /// Keys matching the pattern in this page. May be empty even when the
  /// cursor is not terminal, and may repeat keys from earlier pages.
  pub keys:   Vec<String>,
}

impl ScanPage {
  pub fn is_terminal(&self) -> bool { self.cursor == SCAN_TERMINAL }
}

/// Abstraction over a key-value store backend.
///
/// Values are opaque strings. Timeouts are not the backend's concern; callers
/// wrap each call in their own deadline.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait KvStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch a value. Returns `None` if the key is absent or expired.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  /// Store a value with no expiry, replacing any previous value and TTL.
  fn set<'a>(
    &'a self,
    key: &'a str,
    value: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Store a value that expires after `ttl_secs` seconds.
  fn setex<'a>(
    &'a self,
    key: &'a str,
    ttl_secs: u64,
    value: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete a key. Returns whether it existed.
  fn del<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Continue a scan from `cursor` (start with [`SCAN_TERMINAL`]), returning
  /// keys matching the glob `pattern`. `count` is a hint for how much work
  /// one call does.
  fn scan<'a>(
    &'a self,
    cursor: &'a str,
    pattern: &'a str,
    count: usize,
  ) -> impl Future<Output = Result<ScanPage, Self::Error>> + Send + 'a;
}
