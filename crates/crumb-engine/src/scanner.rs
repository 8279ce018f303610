//! Multi-pattern cursor scans over raw event keys.

use std::collections::HashSet;

use crumb_core::{
  progress::{BatchProgress, ResumeToken},
  store::{KvStore, SCAN_TERMINAL},
};

use crate::{Error, Result, client::KvClient};

/// Where a scan over several patterns stands. A position past the last
/// pattern is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPosition {
  pub pattern_index: usize,
  pub cursor:        String,
}

impl ScanPosition {
  pub fn start() -> Self {
    Self {
      pattern_index: 0,
      cursor:        SCAN_TERMINAL.to_owned(),
    }
  }

  pub fn is_exhausted(&self, patterns: &[String]) -> bool {
    self.pattern_index >= patterns.len()
  }

  /// Resume tokens only carry in-range positions; an exhausted position
  /// is recorded as the last pattern's start plus a complete state.
  pub fn to_token(&self, patterns: &[String]) -> ResumeToken {
    if self.is_exhausted(patterns) {
      return ResumeToken::Cursor {
        pattern_index: patterns.len().saturating_sub(1),
        cursor:        SCAN_TERMINAL.to_owned(),
      };
    }
    ResumeToken::Cursor {
      pattern_index: self.pattern_index,
      cursor:        self.cursor.clone(),
    }
  }

  pub fn from_token(token: &ResumeToken, patterns: &[String]) -> Result<Self> {
    match token {
      ResumeToken::Cursor { pattern_index, cursor } if *pattern_index < patterns.len() => {
        Ok(Self {
          pattern_index: *pattern_index,
          cursor:        cursor.clone(),
        })
      }
      other => Err(Error::Core(crumb_core::Error::InvalidResumeToken(
        other.to_string(),
      ))),
    }
  }

  /// Where the stored progress says to continue.
  ///
  /// A cursor is only meaningful against the pattern list it was taken from.
  /// If the configured patterns changed, other than by appending, the scan
  /// restarts from the first pattern; counters are kept.
  pub fn resume(progress: &BatchProgress, patterns: &[String]) -> Self {
    let compatible = patterns.starts_with(&progress.patterns);
    match &progress.token {
      ResumeToken::Cursor { pattern_index, cursor }
        if compatible && *pattern_index < patterns.len() =>
      {
        Self {
          pattern_index: *pattern_index,
          cursor:        cursor.clone(),
        }
      }
      token => {
        tracing::warn!(
          %token,
          stored = ?progress.patterns,
          configured = ?patterns,
          "stored scan position does not fit the configured patterns; restarting scan"
        );
        Self::start()
      }
    }
  }
}

/// One scan call's worth of keys.
#[derive(Debug)]
pub struct ScanStep {
  /// Accepted keys, deduplicated within the page, in store order.
  pub keys: Vec<String>,
  pub next: ScanPosition,
}

pub struct Scanner<'a, S> {
  client: &'a KvClient<S>,
  count:  usize,
}

impl<'a, S: KvStore> Scanner<'a, S> {
  pub fn new(client: &'a KvClient<S>, count: usize) -> Self { Self { client, count } }

  /// Issue one scan call at `pos`, moving to the next pattern when the
  /// current one's cursor comes back terminal.
  pub async fn step(
    &self,
    patterns: &[String],
    pos: &ScanPosition,
    accept: impl Fn(&str) -> bool,
  ) -> Result<ScanStep> {
    self.step_at_most(patterns, pos, self.count, accept).await
  }

  /// [`Self::step`] with the page size lowered to `count`. The store treats
  /// the count as a hint, so a page may still carry more keys.
  pub async fn step_at_most(
    &self,
    patterns: &[String],
    pos: &ScanPosition,
    count: usize,
    accept: impl Fn(&str) -> bool,
  ) -> Result<ScanStep> {
    let Some(pattern) = patterns.get(pos.pattern_index) else {
      return Ok(ScanStep {
        keys: Vec::new(),
        next: pos.clone(),
      });
    };

    let count = count.clamp(1, self.count);
    let page = self.client.scan(&pos.cursor, pattern, count).await?;
    let next = if page.is_terminal() {
      ScanPosition {
        pattern_index: pos.pattern_index + 1,
        cursor:        SCAN_TERMINAL.to_owned(),
      }
    } else {
      ScanPosition {
        pattern_index: pos.pattern_index,
        cursor:        page.cursor.clone(),
      }
    };

    let mut seen = HashSet::new();
    let mut rejected = 0;
    let mut keys = Vec::with_capacity(page.keys.len());
    for key in page.keys {
      if !accept(&key) {
        rejected += 1;
        continue;
      }
      if seen.insert(key.clone()) {
        keys.push(key);
      }
    }

    tracing::debug!(
      pattern,
      accepted = keys.len(),
      rejected,
      terminal = page.cursor == SCAN_TERMINAL,
      "scan page"
    );
    Ok(ScanStep { keys, next })
  }
}
