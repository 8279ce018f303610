//! Secondary indexes over raw pageviews.
//!
//! Four families group pageviews by session, IP, landing page and source. An
//! [`IndexAccumulator`] is plain local state: a chunk of pageviews is folded
//! into it in one pass, then each group is written once. Records from the same
//! build merge; a record from a different build is replaced.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator as _};
use uuid::Uuid;

use crate::event::Touchpoint;

/// Cap on each related-attribute set in a record.
pub const RELATED_CAP: usize = 50;

// ─── Families ────────────────────────────────────────────────────────────────

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
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexFamily {
  Session,
  Ip,
  LandingPage,
  Source,
}

impl IndexFamily {
  /// Segment used inside store keys; matches the derived-key infixes.
  pub fn key_segment(self) -> &'static str {
    match self {
      Self::Session => "session",
      Self::Ip => "ip",
      Self::LandingPage => "landing",
      Self::Source => "source",
    }
  }

  pub fn from_key_segment(segment: &str) -> Option<Self> {
    Self::iter().find(|f| f.key_segment() == segment)
  }

  /// The grouping value of `tp` in this family, if it has one.
  pub fn group_value(self, tp: &Touchpoint) -> Option<&str> {
    let v = match self {
      Self::Session => tp.session_id.as_deref()?,
      Self::Ip => tp.ip_address.as_str(),
      Self::LandingPage => tp.landing_page.as_str(),
      Self::Source => tp.source.as_str(),
    };
    (!v.is_empty()).then_some(v)
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// Other attribute values seen together with a group key. The set belonging
/// to the record's own family stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedAttributes {
  #[serde(default)]
  pub sessions:      BTreeSet<String>,
  #[serde(default)]
  pub ips:           BTreeSet<String>,
  #[serde(default)]
  pub landing_pages: BTreeSet<String>,
  #[serde(default)]
  pub sources:       BTreeSet<String>,
}

impl RelatedAttributes {
  fn observe(&mut self, own: IndexFamily, tp: &Touchpoint) {
    for family in IndexFamily::iter().filter(|f| *f != own) {
      if let Some(v) = family.group_value(tp) {
        self.set_mut(family).insert(v.to_owned());
      }
    }
  }

  fn set_mut(&mut self, family: IndexFamily) -> &mut BTreeSet<String> {
    match family {
      IndexFamily::Session => &mut self.sessions,
      IndexFamily::Ip => &mut self.ips,
      IndexFamily::LandingPage => &mut self.landing_pages,
      IndexFamily::Source => &mut self.sources,
    }
  }

  fn union(&mut self, other: &Self) {
    for family in IndexFamily::iter() {
      let theirs = match family {
        IndexFamily::Session => &other.sessions,
        IndexFamily::Ip => &other.ips,
        IndexFamily::LandingPage => &other.landing_pages,
        IndexFamily::Source => &other.sources,
      };
      let ours = self.set_mut(family);
      ours.extend(theirs.iter().cloned());
      cap_set(ours, RELATED_CAP);
    }
  }
}

fn cap_set(set: &mut BTreeSet<String>, cap: usize) {
  while set.len() > cap {
    set.pop_last();
  }
}

/// One aggregate per group key, persisted with a TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
  pub family:             IndexFamily,
  /// Decoded group value (the raw session id, IP, URL or source).
  pub group_key:          String,
  /// Most recent first, at most `cap` entries, unique by identity.
  pub pageviews:          Vec<Touchpoint>,
  /// Every pageview folded into this record, including those beyond the cap.
  pub pageview_count:     u64,
  #[serde(default)]
  pub related:            RelatedAttributes,
  pub earliest_timestamp: DateTime<Utc>,
  pub latest_timestamp:   DateTime<Utc>,
  /// The index build job that produced this record.
  pub build_id:           Uuid,
  pub created_at:         DateTime<Utc>,
  pub updated_at:         DateTime<Utc>,
}

impl IndexRecord {
  /// Fold a freshly accumulated group into this stored record.
  ///
  /// Same build: union pageviews, add counts, widen the time range. Different
  /// build: the stored record is stale and `fresh` replaces it.
  pub fn merge(self, fresh: IndexRecord, cap: usize) -> IndexRecord {
    if self.build_id != fresh.build_id {
      return fresh;
    }
    let mut pageviews = self.pageviews;
    pageviews.extend(fresh.pageviews);
    let mut related = self.related;
    related.union(&fresh.related);

    IndexRecord {
      family: self.family,
      group_key: self.group_key,
      pageviews: top_unique(pageviews, cap),
      pageview_count: self.pageview_count + fresh.pageview_count,
      related,
      earliest_timestamp: self.earliest_timestamp.min(fresh.earliest_timestamp),
      latest_timestamp: self.latest_timestamp.max(fresh.latest_timestamp),
      build_id: self.build_id,
      created_at: self.created_at,
      updated_at: fresh.updated_at,
    }
  }
}

/// Sort most-recent-first, drop duplicate identities, keep `cap`.
fn top_unique(mut pageviews: Vec<Touchpoint>, cap: usize) -> Vec<Touchpoint> {
  pageviews.sort_by(Touchpoint::cmp_recent_first);
  let mut seen = HashSet::new();
  pageviews.retain(|tp| seen.insert(tp.identity()));
  pageviews.truncate(cap);
  pageviews
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Group {
  pageviews: Vec<Touchpoint>,
  count:     u64,
  related:   RelatedAttributes,
  earliest:  DateTime<Utc>,
  latest:    DateTime<Utc>,
}

/// In-memory grouping of one chunk of pageviews across all four families.
#[derive(Debug, Default)]
pub struct IndexAccumulator {
  groups: BTreeMap<(IndexFamily, String), Group>,
}

impl IndexAccumulator {
  pub fn new() -> Self { Self::default() }

  pub fn is_empty(&self) -> bool { self.groups.is_empty() }

  /// Number of distinct `(family, group key)` pairs accumulated.
  pub fn len(&self) -> usize { self.groups.len() }

  /// Fold one pageview into every family it has a group value for.
  pub fn absorb(&mut self, tp: &Touchpoint) {
    for family in IndexFamily::iter() {
      let Some(value) = family.group_value(tp) else {
        continue;
      };
      let group = self
        .groups
        .entry((family, value.to_owned()))
        .or_insert_with(|| Group {
          pageviews: Vec::new(),
          count:     0,
          related:   RelatedAttributes::default(),
          earliest:  tp.timestamp,
          latest:    tp.timestamp,
        });
      group.pageviews.push(tp.clone());
      group.count += 1;
      group.related.observe(family, tp);
      group.earliest = group.earliest.min(tp.timestamp);
      group.latest = group.latest.max(tp.timestamp);
    }
  }

  /// Drain into one record per group, each capped at `cap` pageviews.
  pub fn into_records(
    self,
    build_id: Uuid,
    cap: usize,
    now: DateTime<Utc>,
  ) -> Vec<IndexRecord> {
    self
      .groups
      .into_iter()
      .map(|((family, group_key), mut g)| {
        cap_set(&mut g.related.sessions, RELATED_CAP);
        cap_set(&mut g.related.ips, RELATED_CAP);
        cap_set(&mut g.related.landing_pages, RELATED_CAP);
        cap_set(&mut g.related.sources, RELATED_CAP);
        IndexRecord {
          family,
          group_key,
          pageviews: top_unique(g.pageviews, cap),
          pageview_count: g.count,
          related: g.related,
          earliest_timestamp: g.earliest,
          latest_timestamp: g.latest,
          build_id,
          created_at: now,
          updated_at: now,
        }
      })
      .collect()
  }
}
