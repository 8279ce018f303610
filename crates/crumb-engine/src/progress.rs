//! Persisted job progress: load, begin, checkpoint.

use chrono::Utc;
use crumb_core::{
  progress::{BatchProgress, Counters, JobKind, ProgressState, ResumeToken},
  store::KvStore,
};

use crate::{Result, client::KvClient};

/// What an invocation adds to a job's progress record.
#[derive(Debug, Clone)]
pub struct Checkpoint {
  pub delta:    Counters,
  pub token:    ResumeToken,
  pub complete: bool,
}

pub struct ProgressController<'a, S> {
  client:   &'a KvClient<S>,
  ttl_secs: u64,
}

impl<'a, S: KvStore> ProgressController<'a, S> {
  pub fn new(client: &'a KvClient<S>, ttl_secs: u64) -> Self { Self { client, ttl_secs } }

  /// An unreadable record counts as absent; the job starts over.
  pub async fn load(&self, key: &str) -> Result<Option<BatchProgress>> {
    match self.client.get_json::<BatchProgress>(key).await {
      Ok(found) => Ok(found),
      Err(crate::Error::Json(e)) => {
        tracing::warn!(key, error = %e, "discarding unparseable progress record");
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  /// Resume the job stored at `key`, or start a new one. A finished job is
  /// only resumed when the caller names an explicit position.
  pub async fn begin(
    &self,
    key: &str,
    kind: JobKind,
    initial: ResumeToken,
    patterns: &[String],
    explicit_resume: bool,
  ) -> Result<BatchProgress> {
    match self.load(key).await? {
      Some(p) if p.kind == kind && (!p.is_complete() || explicit_resume) => {
        tracing::info!(key, job_id = %p.job_id, token = %p.token, "resuming job");
        Ok(p)
      }
      previous => {
        if let Some(p) = previous.filter(|p| p.kind != kind) {
          tracing::warn!(key, found = %p.kind, expected = %kind, "replacing progress of another job kind");
        }
        let p = BatchProgress::new(kind, initial, patterns.to_vec(), Utc::now());
        tracing::info!(key, job_id = %p.job_id, "starting job");
        self.persist(key, &p).await?;
        Ok(p)
      }
    }
  }

  /// Fold an invocation's delta into the stored record.
  ///
  /// The record is re-read first so counters from an overlapping invocation
  /// are added to rather than overwritten. If the stored record belongs to
  /// a different job (or vanished), `current` is the base.
  pub async fn checkpoint(
    &self,
    key: &str,
    current: &BatchProgress,
    update: Checkpoint,
  ) -> Result<BatchProgress> {
    let mut p = match self.load(key).await {
      Ok(Some(stored)) if stored.job_id == current.job_id => stored,
      Ok(_) => current.clone(),
      Err(e) => {
        tracing::warn!(key, error = %e, "progress re-read failed; checkpointing from memory");
        current.clone()
      }
    };

    p.counters.add(&update.delta);
    p.token = update.token;
    // A cursor scan only learns the size of its work set by finishing.
    if update.complete {
      p.total_items = Some(p.counters.processed);
    }
    p.patterns.clone_from(&current.patterns);
    p.state = if update.complete {
      ProgressState::Complete
    } else {
      ProgressState::InProgress
    };
    p.last_updated = Utc::now();

    self.persist(key, &p).await?;
    tracing::debug!(
      key,
      token = %p.token,
      processed = p.counters.processed,
      complete = p.is_complete(),
      "checkpoint"
    );
    Ok(p)
  }

  async fn persist(&self, key: &str, p: &BatchProgress) -> Result<()> {
    self.client.setex_verified(key, self.ttl_secs, p).await
  }
}
