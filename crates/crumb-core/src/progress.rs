//! Batch progress records and resume tokens.
//!
//! Long jobs run as a sequence of short invocations. Between invocations the
//! only state is a [`BatchProgress`] record in the store; callers also get an
//! opaque [`ResumeToken`] back and may pass it to the next invocation.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::Error;

// ─── Job kinds ───────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
  IndexBuild,
  BulkAttribution,
}

// ─── Resume token ────────────────────────────────────────────────────────────

/// Where the next invocation of a job picks up.
///
/// String form: `cursor:<pattern_index>:<cursor>` or `offset:<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeToken {
  /// Position inside a multi-pattern cursor scan. A cursor of `"0"` at a
  /// non-zero pattern index means "start of that pattern"; exhaustion of the
  /// last pattern is tracked by the progress state, not by the token.
  Cursor {
    pattern_index: usize,
    cursor:        String,
  },
  /// Position inside an ordered work list.
  Offset { offset: u64 },
}

impl ResumeToken {
  pub fn scan_start() -> Self {
    Self::Cursor {
      pattern_index: 0,
      cursor:        "0".to_owned(),
    }
  }
}

impl fmt::Display for ResumeToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Cursor { pattern_index, cursor } => {
        write!(f, "cursor:{pattern_index}:{cursor}")
      }
      Self::Offset { offset } => write!(f, "offset:{offset}"),
    }
  }
}

impl FromStr for ResumeToken {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || Error::InvalidResumeToken(s.to_owned());
    let (kind, rest) = s.trim().split_once(':').ok_or_else(invalid)?;
    match kind {
      "cursor" => {
        let (index, cursor) = rest.split_once(':').ok_or_else(invalid)?;
        if cursor.is_empty() {
          return Err(invalid());
        }
        Ok(Self::Cursor {
          pattern_index: index.parse().map_err(|_| invalid())?,
          cursor:        cursor.to_owned(),
        })
      }
      "offset" => Ok(Self::Offset {
        offset: rest.parse().map_err(|_| invalid())?,
      }),
      _ => Err(invalid()),
    }
  }
}

// ─── Counters ────────────────────────────────────────────────────────────────

/// Work counters. Always combined additively: an invocation reports the delta
/// it performed, never an absolute total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
  /// Records examined.
  pub processed: u64,
  /// Records written (index groups or attribution results).
  pub created:   u64,
  /// Records that could not be read, parsed or written.
  pub failed:    u64,
  /// Records deliberately passed over (already attributed, out of range).
  pub skipped:   u64,
}

impl Counters {
  pub fn add(&mut self, delta: &Counters) {
    self.processed += delta.processed;
    self.created += delta.created;
    self.failed += delta.failed;
    self.skipped += delta.skipped;
  }
}

// ─── Progress record ─────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressState {
  Fresh,
  InProgress,
  Complete,
}

/// Persisted state of one batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
  pub job_id:       Uuid,
  pub kind:         JobKind,
  pub state:        ProgressState,
  pub token:        ResumeToken,
  /// The pattern list a cursor token indexes into, as of the last write.
  #[serde(default)]
  pub patterns:     Vec<String>,
  /// Size of the work set, known once the scan has finished.
  #[serde(default)]
  pub total_items:  Option<u64>,
  #[serde(default)]
  pub counters:     Counters,
  pub started_at:   DateTime<Utc>,
  pub last_updated: DateTime<Utc>,
}

impl BatchProgress {
  pub fn new(
    kind: JobKind,
    token: ResumeToken,
    patterns: Vec<String>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      job_id: Uuid::new_v4(),
      kind,
      state: ProgressState::Fresh,
      token,
      patterns,
      total_items: None,
      counters: Counters::default(),
      started_at: now,
      last_updated: now,
    }
  }

  pub fn is_complete(&self) -> bool { self.state == ProgressState::Complete }
}

// ─── Invocation report ───────────────────────────────────────────────────────

/// What one invocation of a batch job returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
  pub job_id:             Uuid,
  pub kind:               JobKind,
  pub processed_this_run: u64,
  pub created_this_run:   u64,
  pub failed_this_run:    u64,
  pub skipped_this_run:   u64,
  pub total_progress:     Counters,
  pub total_items:        Option<u64>,
  pub is_complete:        bool,
  /// Pass back as the resume token until `is_complete`.
  pub next_resume_token:  Option<String>,
}

impl BatchReport {
  pub fn new(progress: &BatchProgress, this_run: &Counters) -> Self {
    Self {
      job_id:             progress.job_id,
      kind:               progress.kind,
      processed_this_run: this_run.processed,
      created_this_run:   this_run.created,
      failed_this_run:    this_run.failed,
      skipped_this_run:   this_run.skipped,
      total_progress:     progress.counters,
      total_items:        progress.total_items,
      is_complete:        progress.is_complete(),
      next_resume_token:  (!progress.is_complete()).then(|| progress.token.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_string_forms_round_trip() {
    for token in [
      ResumeToken::scan_start(),
      ResumeToken::Cursor {
        pattern_index: 2,
        cursor:        "18446744".into(),
      },
      ResumeToken::Offset { offset: 150 },
    ] {
      let s = token.to_string();
      assert_eq!(s.parse::<ResumeToken>().unwrap(), token);
    }
    assert_eq!(ResumeToken::Offset { offset: 7 }.to_string(), "offset:7");
  }

  #[test]
  fn malformed_tokens_are_rejected() {
    for bad in ["", "offset", "offset:x", "cursor:1", "cursor:a:5", "cursor:1:", "page:3"] {
      assert!(
        matches!(bad.parse::<ResumeToken>(), Err(Error::InvalidResumeToken(_))),
        "{bad:?} should not parse"
      );
    }
  }

  #[test]
  fn cursor_may_contain_colons() {
    let t: ResumeToken = "cursor:0:abc:def".parse().unwrap();
    assert_eq!(t, ResumeToken::Cursor {
      pattern_index: 0,
      cursor:        "abc:def".into(),
    });
  }

  #[test]
  fn counters_add() {
    let mut total = Counters { processed: 5, created: 2, failed: 1, skipped: 0 };
    total.add(&Counters { processed: 3, created: 1, failed: 0, skipped: 4 });
    assert_eq!(total, Counters { processed: 8, created: 3, failed: 1, skipped: 4 });
  }

  #[test]
  fn report_hides_token_once_complete() {
    let mut p = BatchProgress::new(
      JobKind::BulkAttribution,
      ResumeToken::Offset { offset: 10 },
      Vec::new(),
      Utc::now(),
    );
    p.state = ProgressState::InProgress;
    let r = BatchReport::new(&p, &Counters::default());
    assert_eq!(r.next_resume_token.as_deref(), Some("offset:10"));

    p.state = ProgressState::Complete;
    let r = BatchReport::new(&p, &Counters::default());
    assert!(r.is_complete);
    assert_eq!(r.next_resume_token, None);
  }
}
