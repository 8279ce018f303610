//! [`SqliteStore`]: the SQLite implementation of [`KvStore`].

use std::path::Path;

use crumb_core::store::{KvStore, ScanPage};
use rusqlite::OptionalExtension as _;

use crate::{
  Result,
  encode::{RawScanRow, decode_cursor, encode_cursor, expiry_millis, now_millis},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A key-value store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Physically remove expired rows. Reads already ignore them; this only
  /// reclaims space. Returns the number of rows removed.
  pub async fn purge_expired(&self) -> Result<usize> {
    let now = now_millis();
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
          rusqlite::params![now],
        )?)
      })
      .await?;
    Ok(removed)
  }

  async fn upsert(&self, key: &str, value: &str, expires_at: Option<i64>) -> Result<()> {
    let key = key.to_owned();
    let value = value.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(key) DO UPDATE SET
             value      = excluded.value,
             expires_at = excluded.expires_at",
          rusqlite::params![key, value, expires_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── KvStore impl ────────────────────────────────────────────────────────────

impl KvStore for SqliteStore {
  type Error = crate::Error;

  async fn get(&self, key: &str) -> Result<Option<String>> {
    let key = key.to_owned();
    let now = now_millis();

    let value = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT value FROM kv
               WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
              rusqlite::params![key, now],
              |row| row.get::<_, String>(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(value)
  }

  async fn set(&self, key: &str, value: &str) -> Result<()> {
    self.upsert(key, value, None).await
  }

  async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
    let expires_at = expiry_millis(now_millis(), ttl_secs)?;
    self.upsert(key, value, Some(expires_at)).await
  }

  async fn del(&self, key: &str) -> Result<bool> {
    let key = key.to_owned();
    let now = now_millis();

    let existed = self
      .conn
      .call(move |conn| {
        let live = conn.execute(
          "DELETE FROM kv
           WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
          rusqlite::params![key, now],
        )?;
        // Drop an expired row under the same key too.
        conn.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(live > 0)
      })
      .await?;
    Ok(existed)
  }

  async fn scan(&self, cursor: &str, pattern: &str, count: usize) -> Result<ScanPage> {
    let after = decode_cursor(cursor)?;
    let pattern = pattern.to_owned();
    let limit = count.max(1);
    let limit_val = limit as i64;
    let now = now_millis();

    // `count` bounds rows visited, not rows returned, so a page can come back
    // empty with a live cursor.
    let rows: Vec<RawScanRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT rowid, key,
                  key GLOB ?2 AND (expires_at IS NULL OR expires_at > ?3)
           FROM kv
           WHERE rowid > ?1
           ORDER BY rowid
           LIMIT ?4",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![after, pattern, now, limit_val], |row| {
            Ok(RawScanRow {
              rowid:   row.get(0)?,
              key:     row.get(1)?,
              matches: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let cursor = encode_cursor(rows.last().map(|r| r.rowid), rows.len(), limit);
    let keys = rows
      .into_iter()
      .filter(|r| r.matches)
      .map(|r| r.key)
      .collect();

    Ok(ScanPage { cursor, keys })
  }
}
