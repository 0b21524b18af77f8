//! Millisecond clocks used for cache timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::Instant;

/// Monotonic source of "now" in milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> u64;
}

/// Clock backed by tokio's `Instant`, so it follows a paused test runtime.
#[derive(Debug, Clone)]
pub struct TokioClock {
  origin: Instant,
}

impl TokioClock {
  pub fn new() -> Self {
    Self {
      origin: Instant::now(),
    }
  }
}

impl Default for TokioClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for TokioClock {
  fn now_millis(&self) -> u64 {
    self.origin.elapsed().as_millis() as u64
  }
}

/// Manually driven clock.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
  now: Arc<AtomicU64>,
}

impl ManualClock {
  pub fn new(start: u64) -> Self {
    Self {
      now: Arc::new(AtomicU64::new(start)),
    }
  }

  pub fn set(&self, millis: u64) {
    self.now.store(millis, Ordering::SeqCst);
  }

  pub fn advance(&self, millis: u64) {
    self.now.fetch_add(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> u64 {
    self.now.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test(start_paused = true)]
  async fn test_tokio_clock_follows_paused_time() {
    let clock = TokioClock::new();
    assert_eq!(clock.now_millis(), 0);

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert_eq!(clock.now_millis(), 1500);
  }

  #[test]
  fn test_manual_clock_shared_between_clones() {
    let clock = ManualClock::new(10);
    let other = clock.clone();
    other.advance(5);
    assert_eq!(clock.now_millis(), 15);
    clock.set(100);
    assert_eq!(other.now_millis(), 100);
  }
}
