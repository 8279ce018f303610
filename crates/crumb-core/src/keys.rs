//! Store key layout.
//!
//! Raw events, derived indexes, attribution results and progress records all
//! share one flat keyspace. Index keys deliberately live under the pageview
//! prefix, so a plain `pageview:*` scan also returns them; the whitelist in
//! [`KeySpace::is_raw_pageview_key`] is what keeps derived records out of the
//! raw-event stream.
//!
//! Which patterns count as raw events is configuration: the ingestion path has
//! used several naming conventions over time and all of them are merged.

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::index::IndexFamily;

/// Bytes that may not appear verbatim inside one key component: the segment
/// separator, the escape character itself, whitespace and scan-glob
/// metacharacters. IPv6 colons are escaped; periods are left alone, so
/// `2001:db8::1` and `2001.db8..1` stay distinct.
const KEY_COMPONENT: &AsciiSet = &CONTROLS
  .add(b' ')
  .add(b':')
  .add(b'%')
  .add(b'*')
  .add(b'?')
  .add(b'[')
  .add(b']')
  .add(b'\\');

/// Encode a free-form value (IP, URL, source, email) for use as a single key
/// segment.
pub fn encode_component(raw: &str) -> String {
  utf8_percent_encode(raw, KEY_COMPONENT).to_string()
}

/// Inverse of [`encode_component`].
pub fn decode_component(encoded: &str) -> String {
  percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

/// Literal prefix of a glob pattern (everything before the first
/// metacharacter).
pub fn pattern_prefix(pattern: &str) -> &str {
  pattern
    .find(['*', '?', '['])
    .map_or(pattern, |i| &pattern[..i])
}

// ─── KeySpace ────────────────────────────────────────────────────────────────

/// Key naming configuration, deserialised from the `[keys]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySpace {
  /// Scan patterns for raw pageview keys, current convention first.
  pub pageview_patterns:   Vec<String>,
  /// Scan patterns for raw conversion keys, current convention first.
  pub conversion_patterns: Vec<String>,
  /// Substrings that mark a key as derived rather than raw.
  pub derived_infixes:     Vec<String>,
  pub index_prefix:        String,
  pub attribution_prefix:  String,
  pub progress_prefix:     String,
}

impl Default for KeySpace {
  fn default() -> Self {
    let owned = |xs: &[&str]| xs.iter().map(|s| (*s).to_owned()).collect();
    Self {
      pageview_patterns:   owned(&["pageview:*", "pageviews:*", "pv:*"]),
      conversion_patterns: owned(&["conversion:*", "conversions:*", "purchase:*"]),
      derived_infixes:     owned(&[
        ":session:",
        ":ip:",
        ":landing:",
        ":source:",
        ":meta",
        ":progress",
        ":index",
      ]),
      index_prefix:        "pageview".to_owned(),
      attribution_prefix:  "attribution".to_owned(),
      progress_prefix:     "progress".to_owned(),
    }
  }
}

impl KeySpace {
  // ── Raw-key whitelist ─────────────────────────────────────────────────────

  pub fn is_raw_pageview_key(&self, key: &str) -> bool {
    self.is_raw_key(key, &self.pageview_patterns)
  }

  pub fn is_raw_conversion_key(&self, key: &str) -> bool {
    self.is_raw_key(key, &self.conversion_patterns)
  }

  fn is_raw_key(&self, key: &str, patterns: &[String]) -> bool {
    patterns
      .iter()
      .any(|p| key.starts_with(pattern_prefix(p)))
      && has_numeric_suffix(key)
      && !self
        .derived_infixes
        .iter()
        .any(|infix| key.contains(infix.as_str()))
  }

  // ── Derived keys ──────────────────────────────────────────────────────────

  /// `pageview:ip:2001%3Adb8%3A%3A1`
  pub fn index_key(&self, family: IndexFamily, group_value: &str) -> String {
    format!(
      "{}:{}:{}",
      self.index_prefix,
      family.key_segment(),
      encode_component(group_value)
    )
  }

  /// Recover the family and decoded group value from an index key.
  pub fn parse_index_key(&self, key: &str) -> Option<(IndexFamily, String)> {
    let rest = key.strip_prefix(&self.index_prefix)?.strip_prefix(':')?;
    let (segment, encoded) = rest.split_once(':')?;
    let family = IndexFamily::from_key_segment(segment)?;
    Some((family, decode_component(encoded)))
  }

  /// Attribution results are addressed by `(email, conversion timestamp)`.
  pub fn attribution_key(&self, email: &str, timestamp: DateTime<Utc>) -> String {
    format!(
      "{}:{}:{}",
      self.attribution_prefix,
      encode_component(&email.trim().to_lowercase()),
      timestamp.timestamp_millis()
    )
  }

  pub fn progress_key(&self, job: &str) -> String {
    format!("{}:{}", self.progress_prefix, encode_component(job))
  }
}

/// The key ends in a run of digits (the creation timestamp) that follows a
/// separator.
fn has_numeric_suffix(key: &str) -> bool {
  let digits = key
    .bytes()
    .rev()
    .take_while(u8::is_ascii_digit)
    .count();
  if digits == 0 || digits == key.len() {
    return false;
  }
  matches!(key.as_bytes()[key.len() - digits - 1], b':' | b'_' | b'-')
}
