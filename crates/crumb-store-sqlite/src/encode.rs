//! Encoding helpers between the `KvStore` protocol and SQLite columns.
//!
//! Scan cursors are the last rowid visited, rendered as a decimal string;
//! `"0"` is both the start and the end of a scan, as in Redis. Expiry is
//! stored as unix milliseconds.

use chrono::Utc;
use crumb_core::store::SCAN_TERMINAL;

use crate::{Error, Result};

// ─── Cursor ──────────────────────────────────────────────────────────────────

pub fn decode_cursor(cursor: &str) -> Result<i64> {
  cursor
    .parse::<i64>()
    .ok()
    .filter(|rowid| *rowid >= 0)
    .ok_or_else(|| Error::InvalidCursor(cursor.to_owned()))
}

/// Next cursor after a page. A short page means the table is exhausted.
pub fn encode_cursor(last_rowid: Option<i64>, page_len: usize, limit: usize) -> String {
  match last_rowid {
    Some(rowid) if page_len >= limit => rowid.to_string(),
    _ => SCAN_TERMINAL.to_owned(),
  }
}

// ─── Expiry ──────────────────────────────────────────────────────────────────

pub fn now_millis() -> i64 { Utc::now().timestamp_millis() }

pub fn expiry_millis(now: i64, ttl_secs: u64) -> Result<i64> {
  ttl_secs
    .checked_mul(1000)
    .and_then(|ms| i64::try_from(ms).ok())
    .and_then(|ms| now.checked_add(ms))
    .ok_or(Error::InvalidTtl(ttl_secs))
}

/// A row visited by a scan, before pattern and expiry filtering is applied.
pub struct RawScanRow {
  pub rowid:   i64,
  pub key:     String,
  /// `key GLOB pattern` and not expired.
  pub matches: bool,
}
