//! Customer journeys: the touchpoints that preceded one conversion.
//!
//! The engine performs the index lookups; [`assemble`] turns their staged
//! results into a journey. It is the only place the journey invariants are
//! established:
//!
//! - every touchpoint is strictly earlier than the conversion;
//! - no two touchpoints share a `(session_id, timestamp)` identity;
//! - touchpoints are oldest-first with 1-based positions.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{MatchMethod, Touchpoint};

/// Pageviews returned by one index lookup, tagged with how they were found.
#[derive(Debug, Clone)]
pub struct StagedLookup {
  pub method:    MatchMethod,
  pub pageviews: Vec<Touchpoint>,
}

/// A touchpoint placed in a journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyTouchpoint {
  /// 1-based, oldest first.
  pub position:     usize,
  pub match_method: MatchMethod,
  #[serde(flatten)]
  pub touchpoint:   Touchpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerJourney {
  pub conversion_timestamp: DateTime<Utc>,
  pub touchpoints:          Vec<JourneyTouchpoint>,
}

impl CustomerJourney {
  /// A journey with no surviving touchpoints; credit goes to a synthetic
  /// direct visit.
  pub fn conversion_only(conversion_timestamp: DateTime<Utc>) -> Self {
    Self {
      conversion_timestamp,
      touchpoints: Vec::new(),
    }
  }

  pub fn is_conversion_only(&self) -> bool { self.touchpoints.is_empty() }

  pub fn len(&self) -> usize { self.touchpoints.len() }

  pub fn is_empty(&self) -> bool { self.touchpoints.is_empty() }

  /// Distinct lookup methods that contributed at least one touchpoint.
  pub fn methods(&self) -> BTreeSet<MatchMethod> {
    self.touchpoints.iter().map(|t| t.match_method).collect()
  }

  /// The first contributing method in lookup order.
  pub fn primary_method(&self) -> Option<MatchMethod> {
    self.methods().into_iter().next()
  }

  /// Hours between the last touchpoint and the conversion.
  pub fn hours_to_conversion(&self) -> Option<f64> {
    self
      .touchpoints
      .last()
      .map(|t| hours_between(t.touchpoint.timestamp, self.conversion_timestamp))
  }
}

/// Fractional hours from `earlier` to `later`.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
  (later - earlier).num_milliseconds() as f64 / 3_600_000.0
}

/// Merge staged lookups into a journey for a conversion at
/// `conversion_timestamp`.
///
/// Lookups are considered in method order regardless of the order they were
/// staged in, so a pageview found by both the session and an IP lookup keeps
/// `session_match`.
pub fn assemble(
  mut staged: Vec<StagedLookup>,
  conversion_timestamp: DateTime<Utc>,
) -> CustomerJourney {
  staged.sort_by_key(|s| s.method);

  let mut seen = HashSet::new();
  let mut merged: Vec<(MatchMethod, Touchpoint)> = Vec::new();
  for lookup in staged {
    for tp in lookup.pageviews {
      if seen.insert(tp.identity()) {
        merged.push((lookup.method, tp));
      }
    }
  }

  merged.retain(|(_, tp)| tp.timestamp < conversion_timestamp);
  merged.sort_by(|(_, a), (_, b)| b.cmp_recent_first(a));

  let touchpoints = merged
    .into_iter()
    .enumerate()
    .map(|(i, (match_method, touchpoint))| JourneyTouchpoint {
      position: i + 1,
      match_method,
      touchpoint,
    })
    .collect();

  CustomerJourney {
    conversion_timestamp,
    touchpoints,
  }
}
