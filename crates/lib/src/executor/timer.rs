//! Per-tick work budget.

use std::time::{Duration, Instant};

/// Bounds one scheduler tick either by wall-clock time or by items saved.
#[derive(Debug, Clone)]
pub struct CookerTimer {
  start: Instant,
  time_slice: Option<Duration>,
  max_items: usize,
  saved: usize,
}

impl CookerTimer {
  /// Interactive budget: the tick ends once `slice` has elapsed.
  pub fn time_sliced(slice: Duration) -> Self {
    Self {
      start: Instant::now(),
      time_slice: Some(slice),
      max_items: 0,
      saved: 0,
    }
  }

  /// Batch budget: the tick ends after `max_items` saves. Zero means unbounded.
  pub fn batch(max_items: usize) -> Self {
    Self {
      start: Instant::now(),
      time_slice: None,
      max_items,
      saved: 0,
    }
  }

  pub fn is_time_up(&self) -> bool {
    if let Some(slice) = self.time_slice {
      return self.start.elapsed() > slice;
    }
    self.max_items > 0 && self.saved >= self.max_items
  }

  pub fn saved_item(&mut self) {
    self.saved += 1;
  }

  pub fn saved(&self) -> usize {
    self.saved
  }

  pub fn elapsed(&self) -> Duration {
    self.start.elapsed()
  }
}
