//! The attribution calculator.
//!
//! Pure functions from a [`CustomerJourney`] and a conversion value to credit
//! splits under five models, plus a heuristic confidence score. Each model is
//! first computed as shares summing to one, then scaled by the conversion
//! value, so a zero-value conversion still has meaningful percentages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
  Error, Result,
  event::{Conversion, MatchMethod},
  journey::{CustomerJourney, hours_between},
  normalize::DIRECT,
};

/// Seven days.
pub const DEFAULT_HALF_LIFE_HOURS: f64 = 168.0;

// ─── Models ──────────────────────────────────────────────────────────────────

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
pub enum AttributionModel {
  FirstClick,
  LastClick,
  Linear,
  TimeDecay,
  PositionBased,
}

/// Credit assigned to one touchpoint under one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credit {
  pub position:          usize,
  pub source:            String,
  pub landing_page:      String,
  pub timestamp:         DateTime<Utc>,
  /// `None` for the synthetic direct touchpoint of a conversion-only journey.
  pub match_method:      Option<MatchMethod>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_campaign:      Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub utm_medium:        Option<String>,
  pub credit:            f64,
  pub credit_percentage: f64,
}

/// The credited touchpoints of one model, in journey order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelResult {
  pub credits: Vec<Credit>,
}

impl ModelResult {
  pub fn total(&self) -> f64 { self.credits.iter().map(|c| c.credit).sum() }

  /// Credit rolled up per source.
  pub fn by_source(&self) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for c in &self.credits {
      *out.entry(c.source.clone()).or_insert(0.0) += c.credit;
    }
    out
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionModels {
  pub first_click:    ModelResult,
  pub last_click:     ModelResult,
  pub linear:         ModelResult,
  pub time_decay:     ModelResult,
  pub position_based: ModelResult,
}

impl AttributionModels {
  pub fn get(&self, model: AttributionModel) -> &ModelResult {
    match model {
      AttributionModel::FirstClick => &self.first_click,
      AttributionModel::LastClick => &self.last_click,
      AttributionModel::Linear => &self.linear,
      AttributionModel::TimeDecay => &self.time_decay,
      AttributionModel::PositionBased => &self.position_based,
    }
  }
}

// ─── Calculation ─────────────────────────────────────────────────────────────

/// A touchpoint eligible for credit.
struct Candidate<'a> {
  position:     usize,
  source:       &'a str,
  landing_page: &'a str,
  timestamp:    DateTime<Utc>,
  match_method: Option<MatchMethod>,
  utm_campaign: Option<&'a str>,
  utm_medium:   Option<&'a str>,
}

fn candidates(journey: &CustomerJourney) -> Vec<Candidate<'_>> {
  if journey.is_conversion_only() {
    return vec![Candidate {
      position:     1,
      source:       DIRECT,
      landing_page: "",
      timestamp:    journey.conversion_timestamp,
      match_method: None,
      utm_campaign: None,
      utm_medium:   None,
    }];
  }
  journey
    .touchpoints
    .iter()
    .map(|t| Candidate {
      position:     t.position,
      source:       &t.touchpoint.source,
      landing_page: &t.touchpoint.landing_page,
      timestamp:    t.touchpoint.timestamp,
      match_method: Some(t.match_method),
      utm_campaign: t.touchpoint.utm.utm_campaign.as_deref(),
      utm_medium:   t.touchpoint.utm.utm_medium.as_deref(),
    })
    .collect()
}

/// Compute all five models for `journey`.
///
/// Time-decay distances are measured from the conversion's own timestamp, so
/// recomputing an old journey gives the same result.
pub fn calculate(
  journey: &CustomerJourney,
  conversion_value: f64,
  half_life_hours: f64,
) -> Result<AttributionModels> {
  if !(half_life_hours.is_finite() && half_life_hours > 0.0) {
    return Err(Error::InvalidHalfLife(half_life_hours));
  }

  let pool = candidates(journey);
  let n = pool.len();
  let build = |shares: Vec<(usize, f64)>| ModelResult {
    credits: shares
      .into_iter()
      .map(|(i, share)| credit(&pool[i], share, conversion_value))
      .collect(),
  };

  Ok(AttributionModels {
    first_click:    build(vec![(0, 1.0)]),
    last_click:     build(vec![(n - 1, 1.0)]),
    linear:         build(linear_shares(n)),
    time_decay:     build(time_decay_shares(&pool, journey.conversion_timestamp, half_life_hours)),
    position_based: build(position_shares(n)),
  })
}

fn credit(c: &Candidate<'_>, share: f64, value: f64) -> Credit {
  Credit {
    position:          c.position,
    source:            c.source.to_owned(),
    landing_page:      c.landing_page.to_owned(),
    timestamp:         c.timestamp,
    match_method:      c.match_method,
    utm_campaign:      c.utm_campaign.map(str::to_owned),
    utm_medium:        c.utm_medium.map(str::to_owned),
    credit:            share * value,
    credit_percentage: share * 100.0,
  }
}

fn linear_shares(n: usize) -> Vec<(usize, f64)> {
  (0..n).map(|i| (i, 1.0 / n as f64)).collect()
}

/// weight = 2^(−hours / half_life), normalised. Exponents are shifted by
/// their maximum first so that very old journeys do not underflow to an
/// all-zero weight vector.
fn time_decay_shares(
  pool: &[Candidate<'_>],
  conversion_timestamp: DateTime<Utc>,
  half_life_hours: f64,
) -> Vec<(usize, f64)> {
  let exponents: Vec<f64> = pool
    .iter()
    .map(|c| -hours_between(c.timestamp, conversion_timestamp) / half_life_hours)
    .collect();
  let max = exponents.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  let weights: Vec<f64> = exponents.iter().map(|e| (e - max).exp2()).collect();
  let sum: f64 = weights.iter().sum();
  weights
    .into_iter()
    .enumerate()
    .map(|(i, w)| (i, w / sum))
    .collect()
}

/// 40/20/40 with the middle 20% split evenly; degenerate cases for one and two
/// touchpoints.
fn position_shares(n: usize) -> Vec<(usize, f64)> {
  match n {
    1 => vec![(0, 1.0)],
    2 => vec![(0, 0.5), (1, 0.5)],
    _ => {
      let middle = 0.2 / (n - 2) as f64;
      (0..n)
        .map(|i| {
          let share = if i == 0 || i == n - 1 { 0.4 } else { middle };
          (i, share)
        })
        .collect()
    }
  }
}

// ─── Confidence ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Completeness {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Recency {
  WithinDay,
  WithinWeek,
  Stale,
  /// Conversion-only journey; there is no last touchpoint.
  None,
}

/// The inputs that produced a confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
  pub session_id_available: bool,
  pub session_match:        bool,
  pub cross_device:         bool,
  pub journey_completeness: Completeness,
  pub touchpoint_count:     usize,
  pub match_methods:        Vec<MatchMethod>,
  pub multi_method:         bool,
  pub recency:              Recency,
  pub hours_to_conversion:  Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
  /// 0..=100.
  pub score:   u8,
  pub factors: ConfidenceFactors,
}

/// Additive heuristic, capped at 100:
///
/// | factor | points |
/// |--------|--------|
/// | a session lookup contributed | 40 |
/// | primary and conversion IPs differ | 20 |
/// | ≥5 / ≥2 touchpoints | 20 / 10 |
/// | ≥2 distinct lookup methods | 15 |
/// | last touchpoint ≤24h / ≤168h before conversion | 5 / 3 |
pub fn confidence(journey: &CustomerJourney, conversion: &Conversion) -> ConfidenceScore {
  let methods = journey.methods();
  let session_match = methods.contains(&MatchMethod::SessionMatch);
  let cross_device = conversion.is_cross_device();
  let count = journey.len();
  let multi_method = methods.len() >= 2;
  let hours = journey.hours_to_conversion();

  let (journey_completeness, length_points) = match count {
    n if n >= 5 => (Completeness::High, 20),
    n if n >= 2 => (Completeness::Medium, 10),
    _ => (Completeness::Low, 0),
  };
  let (recency, recency_points) = match hours {
    Some(h) if h <= 24.0 => (Recency::WithinDay, 5),
    Some(h) if h <= 168.0 => (Recency::WithinWeek, 3),
    Some(_) => (Recency::Stale, 0),
    None => (Recency::None, 0),
  };

  let score: u32 = [
    if session_match { 40 } else { 0 },
    if cross_device { 20 } else { 0 },
    length_points,
    if multi_method { 15 } else { 0 },
    recency_points,
  ]
  .iter()
  .sum();

  ConfidenceScore {
    score:   score.min(100) as u8,
    factors: ConfidenceFactors {
      session_id_available: conversion.session_id.is_some(),
      session_match,
      cross_device,
      journey_completeness,
      touchpoint_count: count,
      match_methods: methods.into_iter().collect(),
      multi_method,
      recency,
      hours_to_conversion: hours,
    },
  }
}

// ─── Result record ───────────────────────────────────────────────────────────

/// The subset of a conversion carried in a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
  pub email:              String,
  pub timestamp:          DateTime<Utc>,
  pub order_total:        f64,
  pub order_id:           Option<String>,
  pub attribution_found:  bool,
  pub attribution_method: Option<MatchMethod>,
  pub attribution_score:  u8,
}

/// The system-of-record attribution for one conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
  pub conversion:      ConversionSummary,
  pub journey:         CustomerJourney,
  pub models:          AttributionModels,
  pub confidence:      ConfidenceScore,
  pub half_life_hours: f64,
  pub computed_at:     DateTime<Utc>,
}

/// Run the calculator and the confidence heuristic for one conversion.
pub fn attribute(
  conversion: &Conversion,
  journey: CustomerJourney,
  half_life_hours: f64,
  computed_at: DateTime<Utc>,
) -> Result<AttributionResult> {
  let models = calculate(&journey, conversion.order_total, half_life_hours)?;
  let confidence = confidence(&journey, conversion);

  Ok(AttributionResult {
    conversion: ConversionSummary {
      email:              conversion.email.clone(),
      timestamp:          conversion.timestamp,
      order_total:        conversion.order_total,
      order_id:           conversion.order_id.clone(),
      attribution_found:  !journey.is_conversion_only(),
      attribution_method: journey.primary_method(),
      attribution_score:  confidence.score,
    },
    journey,
    models,
    confidence,
    half_life_hours,
    computed_at,
  })
}
