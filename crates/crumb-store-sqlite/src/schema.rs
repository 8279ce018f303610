//! SQL schema for the Crumb SQLite key-value store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per key. Upserts keep the rowid stable, which is what scan cursors
-- are built on.
CREATE TABLE IF NOT EXISTS kv (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    expires_at  INTEGER            -- unix milliseconds; NULL = no expiry
);

CREATE INDEX IF NOT EXISTS kv_expires_idx ON kv(expires_at);

PRAGMA user_version = 1;
";
