//! Wall-clock budget of one invocation.

use std::time::{Duration, Instant};

/// Checked at chunk boundaries. A deadline never interrupts a store call; it
/// decides whether another chunk may start.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
  started: Instant,
  budget:  Duration,
  margin:  Duration,
}

impl Deadline {
  /// `budget` is the host's hard limit; work stops once less than `margin`
  /// remains, leaving time to checkpoint.
  pub fn new(budget: Duration, margin: Duration) -> Self {
    Self {
      started: Instant::now(),
      budget,
      margin,
    }
  }

  /// Never expires. One invocation runs the job to completion.
  pub fn unbounded() -> Self { Self::new(Duration::MAX, Duration::ZERO) }

  pub fn elapsed(&self) -> Duration { self.started.elapsed() }

  pub fn is_expired(&self) -> bool {
    self.elapsed().saturating_add(self.margin) >= self.budget
  }
}
