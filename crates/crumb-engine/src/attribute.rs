//! Attribution of conversions: one at a time on demand, or in bulk as a
//! resumable job.

use std::fmt;

use chrono::{DateTime, Utc};
use crumb_core::{
  attribution::{self, AttributionResult},
  event::Conversion,
  keys::KeySpace,
  normalize,
  progress::{BatchReport, Counters, JobKind, ResumeToken},
  store::KvStore,
};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::{
  Result,
  client::KvClient,
  config::EngineConfig,
  deadline::Deadline,
  journey::JourneyReconstructor,
  progress::{Checkpoint, ProgressController},
  scanner::{ScanPosition, Scanner},
};

// ─── Requests ────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueryType {
  /// Only conversions without a stored result.
  #[default]
  Pending,
  /// Every conversion, replacing stored results.
  All,
}

/// Conversion timestamps from `from` (inclusive) to `to` (exclusive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
  pub from: Option<DateTime<Utc>>,
  pub to:   Option<DateTime<Utc>>,
}

impl DateRange {
  pub fn contains(&self, ts: DateTime<Utc>) -> bool {
    self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts < to)
  }
}

impl fmt::Display for DateRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let bound = |b: Option<DateTime<Utc>>| b.map_or_else(|| "*".to_owned(), |t| t.to_rfc3339());
    write!(f, "{}..{}", bound(self.from), bound(self.to))
  }
}

#[derive(Debug, Clone, Default)]
pub struct AttributionRequest {
  pub query_type: QueryType,
  /// Conversions to visit in this invocation. Scan pages are never split,
  /// so a store that overshoots the requested page size can exceed it.
  pub limit:      Option<usize>,
  pub resume:     Option<ResumeToken>,
  pub date_range: DateRange,
}

impl AttributionRequest {
  /// Each query shape keeps its own progress record.
  pub fn job_name(&self) -> String {
    format!("bulk_attribution:{}:{}", self.query_type, self.date_range)
  }
}

// ─── Attributor ──────────────────────────────────────────────────────────────

enum Outcome {
  Created,
  Skipped,
  Failed,
}

pub struct Attributor<'a, S> {
  client: &'a KvClient<S>,
  keys:   &'a KeySpace,
  config: &'a EngineConfig,
}

impl<'a, S: KvStore> Attributor<'a, S> {
  pub fn new(client: &'a KvClient<S>, keys: &'a KeySpace, config: &'a EngineConfig) -> Self {
    Self { client, keys, config }
  }

  /// Reconstruct, score and store one conversion.
  pub async fn attribute(&self, conversion: &Conversion) -> Result<AttributionResult> {
    let journey = JourneyReconstructor::new(self.client, self.keys)
      .reconstruct(conversion)
      .await;
    let result = attribution::attribute(
      conversion,
      journey,
      self.config.half_life_hours,
      Utc::now(),
    )?;
    let key = self
      .keys
      .attribution_key(&conversion.email, conversion.timestamp);
    self.client.set_verified(&key, &result).await?;
    tracing::debug!(
      key,
      touchpoints = result.journey.len(),
      score = result.confidence.score,
      "attribution stored"
    );
    Ok(result)
  }

  /// Attribute the conversion stored at `conversion_key`. `None` if the key
  /// does not exist.
  pub async fn attribute_key(&self, conversion_key: &str) -> Result<Option<AttributionResult>> {
    let Some(raw) = self.client.get_json::<Value>(conversion_key).await? else {
      return Ok(None);
    };
    let conversion = normalize::conversion(&raw)?;
    self.attribute(&conversion).await.map(Some)
  }

  /// A previously stored result.
  pub async fn load(&self, email: &str, timestamp: DateTime<Utc>) -> Result<Option<AttributionResult>> {
    let key = self.keys.attribution_key(email, timestamp);
    self.client.get_json(&key).await
  }

  /// Run one invocation of bulk attribution.
  ///
  /// Walks the conversion patterns with a cursor and attributes each scan
  /// page as it arrives. A page is the unit of progress: the token only
  /// moves past it once every conversion on it has been handled, and a page
  /// that aborts the job is retried whole by the next invocation without
  /// its outcomes being counted.
  pub async fn run(&self, request: &AttributionRequest, deadline: &Deadline) -> Result<BatchReport> {
    let job_key = self.keys.progress_key(&request.job_name());
    let patterns = &self.keys.conversion_patterns;
    let ctl = ProgressController::new(self.client, self.config.progress_ttl_secs);
    let scanner = Scanner::new(self.client, self.config.scan_count);

    let mut progress = ctl
      .begin(
        &job_key,
        JobKind::BulkAttribution,
        ResumeToken::scan_start(),
        patterns,
        request.resume.is_some(),
      )
      .await?;
    let mut pos = match &request.resume {
      Some(token) => ScanPosition::from_token(token, patterns)?,
      None => ScanPosition::resume(&progress, patterns),
    };
    progress.patterns.clone_from(patterns);
    let limit = request.limit.unwrap_or(usize::MAX);

    tracing::info!(
      job_id = %progress.job_id,
      query_type = %request.query_type,
      range = %request.date_range,
      pattern_index = pos.pattern_index,
      cursor = %pos.cursor,
      "bulk attribution invocation"
    );

    let mut run = Counters::default();
    let mut pending = Counters::default();
    let mut visited = 0;
    let mut pages = 0;
    let mut chunks = 0;
    let mut dirty = true;

    loop {
      let mut stop = false;
      if pos.is_exhausted(patterns) || visited >= limit {
        stop = true;
      } else if pages >= self.config.max_pages_per_run {
        tracing::warn!(pages, "page cap reached; cursor may not be terminating");
        stop = true;
      } else {
        let step = scanner
          .step_at_most(patterns, &pos, limit - visited, |k| {
            self.keys.is_raw_conversion_key(k)
          })
          .await;
        match step {
          Ok(step) => match self.attribute_page(&step.keys, request).await {
            Ok(outcomes) => {
              visited += step.keys.len();
              pending.add(&outcomes);
              pos = step.next;
              pages += 1;
              chunks += 1;
              dirty = true;
            }
            Err(e) => {
              tracing::error!(
                error = %e,
                token = %pos.to_token(patterns),
                "bulk attribution aborted; the page will be retried"
              );
              // Pages finished before this one are still recorded.
              let saved = ctl
                .checkpoint(&job_key, &progress, Checkpoint {
                  delta:    pending,
                  token:    pos.to_token(patterns),
                  complete: false,
                })
                .await;
              if let Err(ce) = saved {
                tracing::error!(error = %ce, "checkpoint after abort also failed");
              }
              return Err(e);
            }
          },
          Err(e) => {
            tracing::warn!(error = %e, "scan failed; ending this invocation early");
            stop = true;
          }
        }
      }
      let stop = stop || pos.is_exhausted(patterns) || visited >= limit || deadline.is_expired();

      if dirty && (stop || chunks >= self.config.flush_every_chunks) {
        progress = ctl
          .checkpoint(&job_key, &progress, Checkpoint {
            delta:    pending,
            token:    pos.to_token(patterns),
            complete: pos.is_exhausted(patterns),
          })
          .await?;
        run.add(&pending);
        pending = Counters::default();
        chunks = 0;
        dirty = false;
      }
      if stop {
        break;
      }
    }

    tracing::info!(
      job_id = %progress.job_id,
      pages,
      processed = run.processed,
      created = run.created,
      skipped = run.skipped,
      failed = run.failed,
      complete = progress.is_complete(),
      "bulk attribution invocation finished"
    );
    Ok(BatchReport::new(&progress, &run))
  }

  /// Attribute one scan page. A job-fatal error on any conversion fails the
  /// whole page.
  async fn attribute_page(&self, keys: &[String], request: &AttributionRequest) -> Result<Counters> {
    let outcomes: Vec<Result<Outcome>> = stream::iter(keys)
      .map(|key| self.process(key, request))
      .buffered(self.config.fetch_concurrency.max(1))
      .collect()
      .await;

    let mut counters = Counters::default();
    for outcome in outcomes {
      counters.processed += 1;
      match outcome? {
        Outcome::Created => counters.created += 1,
        Outcome::Skipped => counters.skipped += 1,
        Outcome::Failed => counters.failed += 1,
      }
    }
    Ok(counters)
  }

  async fn process(&self, key: &str, request: &AttributionRequest) -> Result<Outcome> {
    let raw = match self.client.get_json::<Value>(key).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return Ok(Outcome::Skipped),
      Err(e) => {
        tracing::warn!(key, error = %e, "conversion fetch failed");
        return Ok(Outcome::Failed);
      }
    };
    let conversion = match normalize::conversion(&raw) {
      Ok(c) => c,
      Err(e) => {
        tracing::debug!(key, error = %e, "unusable conversion");
        return Ok(Outcome::Failed);
      }
    };
    if !request.date_range.contains(conversion.timestamp) {
      return Ok(Outcome::Skipped);
    }

    if request.query_type == QueryType::Pending {
      let result_key = self
        .keys
        .attribution_key(&conversion.email, conversion.timestamp);
      match self.client.get(&result_key).await {
        Ok(Some(_)) => return Ok(Outcome::Skipped),
        Ok(None) => {}
        // Recomputing is safe; the write replaces.
        Err(e) => tracing::warn!(key = result_key, error = %e, "existence check failed"),
      }
    }

    match self.attribute(&conversion).await {
      Ok(_) => Ok(Outcome::Created),
      Err(e) if e.is_job_fatal() => Err(e),
      Err(e) => {
        tracing::warn!(key, error = %e, "attribution failed");
        Ok(Outcome::Failed)
      }
    }
  }
}
