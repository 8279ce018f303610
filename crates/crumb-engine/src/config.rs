//! Engine tuning, deserialised from the `[engine]` config section.

use std::time::Duration;

use crumb_core::attribution::DEFAULT_HALF_LIFE_HOURS;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, deadline::Deadline};

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Timeout applied to every individual store call.
  pub call_timeout_ms:    u64,
  /// Wall-clock budget of one invocation.
  pub time_budget_secs:   u64,
  /// Reserved at the end of the budget for the final checkpoint.
  pub safety_margin_secs: u64,
  /// `COUNT` hint passed to each scan call.
  pub scan_count:         usize,
  /// Scan pages one invocation may visit, whatever the cursor says.
  pub max_pages_per_run:  usize,
  /// Maximum store calls in flight for one batch of lookups.
  pub fetch_concurrency:  usize,
  /// Scan pages between checkpoints.
  pub flush_every_chunks: usize,
  /// Pageviews kept per index record.
  pub index_cap:          usize,
  pub index_ttl_secs:     u64,
  pub progress_ttl_secs:  u64,
  pub half_life_hours:    f64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      call_timeout_ms:    2_000,
      time_budget_secs:   55,
      safety_margin_secs: 5,
      scan_count:         200,
      max_pages_per_run:  1_000,
      fetch_concurrency:  16,
      flush_every_chunks: 1,
      index_cap:          50,
      index_ttl_secs:     30 * DAY_SECS,
      progress_ttl_secs:  12 * 60 * 60,
      half_life_hours:    DEFAULT_HALF_LIFE_HOURS,
    }
  }
}

impl EngineConfig {
  pub fn call_timeout(&self) -> Duration { Duration::from_millis(self.call_timeout_ms) }

  /// A fresh deadline for one invocation, starting now.
  pub fn deadline(&self) -> Deadline {
    Deadline::new(
      Duration::from_secs(self.time_budget_secs),
      Duration::from_secs(self.safety_margin_secs),
    )
  }

  pub fn validate(&self) -> Result<()> {
    let positive = [
      ("call_timeout_ms", self.call_timeout_ms as usize),
      ("scan_count", self.scan_count),
      ("max_pages_per_run", self.max_pages_per_run),
      ("fetch_concurrency", self.fetch_concurrency),
      ("flush_every_chunks", self.flush_every_chunks),
      ("index_cap", self.index_cap),
      ("index_ttl_secs", self.index_ttl_secs as usize),
      ("progress_ttl_secs", self.progress_ttl_secs as usize),
    ];
    if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
      return Err(Error::Config(format!("engine.{name} must be greater than zero")));
    }
    if !(self.half_life_hours.is_finite() && self.half_life_hours > 0.0) {
      return Err(Error::Config(format!(
        "engine.half_life_hours must be positive, got {}",
        self.half_life_hours
      )));
    }
    if self.safety_margin_secs >= self.time_budget_secs && self.time_budget_secs > 0 {
      tracing::warn!(
        budget = self.time_budget_secs,
        margin = self.safety_margin_secs,
        "safety margin consumes the whole time budget; each run will scan one page"
      );
    }
    Ok(())
  }
}
