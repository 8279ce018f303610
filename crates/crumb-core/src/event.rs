//! Event records: the canonical in-memory shape of pageviews and
//! conversions.
//!
//! Raw records in the store come in several historical shapes; they are
//! mapped onto these types once, at the read boundary, by
//! [`crate::normalize`]. Nothing downstream inspects raw JSON.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ─── Campaign tags ───────────────────────────────────────────────────────────

/// UTM campaign parameters captured with a pageview. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utm {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_campaign: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_medium:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_source:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_term:     Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_content:  Option<String>,
}

// ─── Touchpoint ──────────────────────────────────────────────────────────────

/// One recorded pageview. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Touchpoint {
  pub timestamp:    DateTime<Utc>,
  pub session_id:   Option<String>,
  pub ip_address:   String,
  pub landing_page: String,
  /// Traffic source, already derived and lowercased (`"direct"` if unknown).
  pub source:       String,
  #[serde(flatten)]
  pub utm:          Utm,
}

/// Deduplication identity of a touchpoint: `(session_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TouchpointIdentity {
  pub session_id: Option<String>,
  pub timestamp:  DateTime<Utc>,
}

impl Touchpoint {
  pub fn identity(&self) -> TouchpointIdentity {
    TouchpointIdentity {
      session_id: self.session_id.clone(),
      timestamp:  self.timestamp,
    }
  }

  /// Total order with the most recent pageview first. Ties on timestamp are
  /// broken on the remaining fields so that capped lists are deterministic
  /// regardless of the order pageviews were observed in.
  pub fn cmp_recent_first(&self, other: &Self) -> Ordering {
    other
      .timestamp
      .cmp(&self.timestamp)
      .then_with(|| self.session_id.cmp(&other.session_id))
      .then_with(|| self.ip_address.cmp(&other.ip_address))
      .then_with(|| self.landing_page.cmp(&other.landing_page))
      .then_with(|| self.source.cmp(&other.source))
  }
}

// ─── Match methods ───────────────────────────────────────────────────────────

/// How a touchpoint was linked to a conversion. Variant order is lookup
/// order: when the same pageview is found twice, the earlier method wins.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchMethod {
  SessionMatch,
  PrimaryIpMatch,
  ConversionIpMatch,
}

// ─── Conversion ──────────────────────────────────────────────────────────────

/// A purchase or sign-up. `order_total` may be zero (free trials).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
  pub timestamp:          DateTime<Utc>,
  pub email:              String,
  pub order_total:        f64,
  pub order_id:           Option<String>,
  /// The IP the customer was first seen with.
  pub primary_ip:         Option<String>,
  /// The IP the conversion itself was recorded from.
  pub conversion_ip:      Option<String>,
  pub session_id:         Option<String>,
  #[serde(default)]
  pub attribution_found:  bool,
  #[serde(default)]
  pub attribution_method: Option<MatchMethod>,
  #[serde(default)]
  pub attribution_score:  u8,
}

impl Conversion {
  /// The conversion IP, but only when it carries information beyond the
  /// primary IP.
  pub fn distinct_conversion_ip(&self) -> Option<&str> {
    match (&self.primary_ip, &self.conversion_ip) {
      (Some(primary), Some(conv)) if primary == conv => None,
      (_, conv) => conv.as_deref(),
    }
  }

  /// Both IPs are known and differ: the customer likely switched devices or
  /// networks between first visit and purchase.
  pub fn is_cross_device(&self) -> bool {
    matches!(
      (&self.primary_ip, &self.conversion_ip),
      (Some(primary), Some(conv)) if primary != conv
    )
  }
}
