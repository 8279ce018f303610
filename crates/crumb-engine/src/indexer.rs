//! The index build job: scan raw pageviews, group them, merge the groups
//! into the stored index records.

use chrono::Utc;
use crumb_core::{
  index::{IndexAccumulator, IndexRecord},
  keys::KeySpace,
  normalize,
  progress::{BatchReport, Counters, JobKind, ResumeToken},
  store::KvStore,
};
use futures::{StreamExt, stream};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  Error, Result,
  client::KvClient,
  config::EngineConfig,
  deadline::Deadline,
  progress::{Checkpoint, ProgressController},
  scanner::{ScanPosition, Scanner},
};

/// Progress record name of the index build.
pub const JOB: &str = "index_build";

pub struct IndexBuilder<'a, S> {
  client: &'a KvClient<S>,
  keys:   &'a KeySpace,
  config: &'a EngineConfig,
}

impl<'a, S: KvStore> IndexBuilder<'a, S> {
  pub fn new(client: &'a KvClient<S>, keys: &'a KeySpace, config: &'a EngineConfig) -> Self {
    Self { client, keys, config }
  }

  /// Run one invocation. Picks up where the stored progress left off unless
  /// `resume` names a position.
  ///
  /// Index groups are flushed before every checkpoint, so a crash between
  /// the two replays at most one flush interval. Replayed pageviews merge
  /// away in the record's pageview list; `pageview_count` may overcount.
  pub async fn run(&self, resume: Option<ResumeToken>, deadline: &Deadline) -> Result<BatchReport> {
    let job_key = self.keys.progress_key(JOB);
    let patterns = &self.keys.pageview_patterns;
    let ctl = ProgressController::new(self.client, self.config.progress_ttl_secs);
    let scanner = Scanner::new(self.client, self.config.scan_count);

    let mut progress = ctl
      .begin(
        &job_key,
        JobKind::IndexBuild,
        ResumeToken::scan_start(),
        patterns,
        resume.is_some(),
      )
      .await?;
    let mut pos = match &resume {
      Some(token) => ScanPosition::from_token(token, patterns)?,
      None => ScanPosition::resume(&progress, patterns),
    };
    progress.patterns.clone_from(patterns);

    tracing::info!(
      job_id = %progress.job_id,
      pattern_index = pos.pattern_index,
      cursor = %pos.cursor,
      "index build invocation"
    );

    let mut run = Counters::default();
    let mut pending = Counters::default();
    let mut acc = IndexAccumulator::new();
    let mut pages = 0;
    let mut chunks = 0;
    let mut dirty = true;

    loop {
      let mut stop = false;
      if pos.is_exhausted(patterns) {
        stop = true;
      } else if pages >= self.config.max_pages_per_run {
        tracing::warn!(pages, "page cap reached; cursor may not be terminating");
        stop = true;
      } else {
        match scanner
          .step(patterns, &pos, |k| self.keys.is_raw_pageview_key(k))
          .await
        {
          Ok(step) => {
            self.absorb(&step.keys, &mut acc, &mut pending).await;
            pos = step.next;
            pages += 1;
            chunks += 1;
            dirty = true;
          }
          Err(e) => {
            tracing::warn!(error = %e, "scan failed; ending this invocation early");
            stop = true;
          }
        }
      }
      let stop = stop || pos.is_exhausted(patterns) || deadline.is_expired();

      if dirty && (stop || chunks >= self.config.flush_every_chunks) {
        let written = self
          .flush(std::mem::take(&mut acc), progress.job_id)
          .await;
        pending.add(&written);
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
      groups_written = run.created,
      failed = run.failed,
      complete = progress.is_complete(),
      "index build invocation finished"
    );
    Ok(BatchReport::new(&progress, &run))
  }

  async fn absorb(&self, keys: &[String], acc: &mut IndexAccumulator, counters: &mut Counters) {
    let fetched = self
      .client
      .get_many::<Value>(keys, self.config.fetch_concurrency)
      .await;
    for (key, res) in fetched {
      counters.processed += 1;
      match res {
        Ok(Some(raw)) => match normalize::touchpoint(&raw) {
          Ok(tp) => acc.absorb(&tp),
          Err(e) => {
            counters.failed += 1;
            tracing::debug!(key, error = %e, "unusable pageview");
          }
        },
        // Expired between the scan and the fetch.
        Ok(None) => counters.skipped += 1,
        Err(e) => {
          counters.failed += 1;
          tracing::warn!(key, error = %e, "pageview fetch failed");
        }
      }
    }
  }

  /// Merge every accumulated group into the store. One group failing does
  /// not stop the others.
  async fn flush(&self, acc: IndexAccumulator, build_id: Uuid) -> Counters {
    let mut written = Counters::default();
    if acc.is_empty() {
      return written;
    }
    let records = acc.into_records(build_id, self.config.index_cap, Utc::now());
    let results: Vec<_> = stream::iter(records)
      .map(|record| async move {
        let key = self.keys.index_key(record.family, &record.group_key);
        let res = self.write_group(&key, record).await;
        (key, res)
      })
      .buffer_unordered(self.config.fetch_concurrency.max(1))
      .collect()
      .await;

    for (key, res) in results {
      match res {
        Ok(()) => written.created += 1,
        Err(e) => {
          written.failed += 1;
          tracing::warn!(key, error = %e, "index group write failed; skipping");
        }
      }
    }
    written
  }

  async fn write_group(&self, key: &str, fresh: IndexRecord) -> Result<()> {
    let merged = match self.client.get_json::<IndexRecord>(key).await {
      Ok(Some(existing)) => existing.merge(fresh, self.config.index_cap),
      Ok(None) => fresh,
      Err(Error::Json(e)) => {
        tracing::warn!(key, error = %e, "replacing unparseable index record");
        fresh
      }
      Err(e) => return Err(e),
    };
    self
      .client
      .setex_json(key, self.config.index_ttl_secs, &merged)
      .await
  }
}
