//! Retry policy and backoff shared by queries and mutations.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{QueryError, Result};

/// Upper bound of the default exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Decides whether a failed attempt is retried. Receives the number of
/// failures so far (1 after the first failure) and the latest error.
pub type RetryPredicate = Arc<dyn Fn(u32, &QueryError) -> bool + Send + Sync>;

/// Computes the wait before the next attempt from the failure count and error.
pub type DelayFn = Arc<dyn Fn(u32, &QueryError) -> Duration + Send + Sync>;

/// How many times a failing operation is retried.
#[derive(Clone)]
pub enum Retry {
  /// `false`: fail on the first error.
  Never,
  /// `true`: retry until success or cancellation.
  Always,
  /// Retry up to N times, so N + 1 attempts in total.
  Count(u32),
  /// Retry while the predicate holds.
  When(RetryPredicate),
}

impl Retry {
  pub fn when<F>(predicate: F) -> Self
  where
    F: Fn(u32, &QueryError) -> bool + Send + Sync + 'static,
  {
    Self::When(Arc::new(predicate))
  }

  pub fn should_retry(&self, failure_count: u32, error: &QueryError) -> bool {
    match self {
      Self::Never => false,
      Self::Always => true,
      Self::Count(max) => failure_count <= *max,
      Self::When(predicate) => predicate(failure_count, error),
    }
  }
}

impl From<bool> for Retry {
  fn from(retry: bool) -> Self {
    if retry {
      Self::Always
    } else {
      Self::Never
    }
  }
}

impl From<u32> for Retry {
  fn from(count: u32) -> Self {
    Self::Count(count)
  }
}

impl fmt::Debug for Retry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Never => f.write_str("Never"),
      Self::Always => f.write_str("Always"),
      Self::Count(n) => f.debug_tuple("Count").field(n).finish(),
      Self::When(_) => f.write_str("When(..)"),
    }
  }
}

/// Wait between attempts.
#[derive(Clone, Default)]
pub enum RetryDelay {
  /// `min(1000ms * 2^failure_count, 30s)`
  #[default]
  Exponential,
  Fixed(Duration),
  With(DelayFn),
}

impl RetryDelay {
  pub fn with<F>(delay: F) -> Self
  where
    F: Fn(u32, &QueryError) -> Duration + Send + Sync + 'static,
  {
    Self::With(Arc::new(delay))
  }

  pub fn delay(&self, failure_count: u32, error: &QueryError) -> Duration {
    match self {
      Self::Exponential => exponential_backoff(failure_count),
      Self::Fixed(delay) => *delay,
      Self::With(delay) => delay(failure_count, error),
    }
  }
}

impl From<Duration> for RetryDelay {
  fn from(delay: Duration) -> Self {
    Self::Fixed(delay)
  }
}

impl fmt::Debug for RetryDelay {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Exponential => f.write_str("Exponential"),
      Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
      Self::With(_) => f.write_str("With(..)"),
    }
  }
}

pub fn exponential_backoff(failure_count: u32) -> Duration {
  let millis = 2u64
    .saturating_pow(failure_count)
    .saturating_mul(1000)
    .min(MAX_BACKOFF.as_millis() as u64);
  Duration::from_millis(millis)
}

/// Run `attempt` until it succeeds or the policy gives up.
///
/// `attempt` receives the failure count so far. `on_failure` runs after every
/// failed attempt, before the policy is consulted. Cancellation ends the loop
/// immediately and is never reported to `on_failure`.
pub async fn run_with_retry<T, F, Fut, H>(
  key: &str,
  retry: &Retry,
  retry_delay: &RetryDelay,
  mut attempt: F,
  mut on_failure: H,
) -> Result<T>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T>>,
  H: FnMut(u32, &QueryError),
{
  let mut failure_count = 0u32;

  loop {
    let error = match attempt(failure_count).await {
      Ok(value) => return Ok(value),
      Err(QueryError::Cancelled) => return Err(QueryError::Cancelled),
      Err(error) => error,
    };

    failure_count = failure_count.saturating_add(1);
    on_failure(failure_count, &error);

    if !retry.should_retry(failure_count, &error) {
      warn!(key, failure_count, error = %error, "giving up after failure");
      return Err(error);
    }

    let delay = retry_delay.delay(failure_count, &error);
    warn!(
      key,
      failure_count,
      delay_ms = delay.as_millis() as u64,
      error = %error,
      "attempt failed, retrying"
    );
    tokio::time::sleep(delay).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn boom() -> QueryError {
    QueryError::transport("boom")
  }

  #[test]
  fn test_count_allows_exactly_n_retries() {
    let retry = Retry::Count(2);
    assert!(retry.should_retry(1, &boom()));
    assert!(retry.should_retry(2, &boom()));
    assert!(!retry.should_retry(3, &boom()));
  }

  #[test]
  fn test_bool_and_predicate() {
    assert!(Retry::from(true).should_retry(100, &boom()));
    assert!(!Retry::from(false).should_retry(1, &boom()));

    let retry = Retry::when(|count, err| count < 2 && err.to_string() == "boom");
    assert!(retry.should_retry(1, &boom()));
    assert!(!retry.should_retry(2, &boom()));
    assert!(!retry.should_retry(1, &QueryError::transport("other")));
  }

  #[test]
  fn test_exponential_backoff_is_capped() {
    assert_eq!(exponential_backoff(0), Duration::from_millis(1000));
    assert_eq!(exponential_backoff(1), Duration::from_millis(2000));
    assert_eq!(exponential_backoff(4), Duration::from_millis(16000));
    assert_eq!(exponential_backoff(5), MAX_BACKOFF);
    assert_eq!(exponential_backoff(200), MAX_BACKOFF);
  }

  #[test]
  fn test_delay_function_sees_failure_count() {
    let delay = RetryDelay::with(|count, _| Duration::from_millis(u64::from(count) * 10));
    assert_eq!(delay.delay(3, &boom()), Duration::from_millis(30));
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_attempts_retry_plus_one_times() {
    let attempts = AtomicU32::new(0);
    let failures = AtomicU32::new(0);

    let result: Result<()> = run_with_retry(
      "k",
      &Retry::Count(2),
      &RetryDelay::Fixed(Duration::ZERO),
      |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(boom()) }
      },
      |_, _| {
        failures.fetch_add(1, Ordering::SeqCst);
      },
    )
    .await;

    assert_eq!(result, Err(boom()));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(failures.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_waits_backoff_between_attempts() {
    let start = tokio::time::Instant::now();

    let result = run_with_retry(
      "k",
      &Retry::Count(3),
      &RetryDelay::Exponential,
      |failures| async move {
        if failures < 2 {
          Err(boom())
        } else {
          Ok(failures)
        }
      },
      |_, _| {},
    )
    .await;

    assert_eq!(result, Ok(2));
    // 2s after the first failure, 4s after the second
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(6000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(6100), "{:?}", elapsed);
  }

  #[tokio::test]
  async fn test_cancellation_is_not_retried() {
    let failures = AtomicU32::new(0);
    let result: Result<()> = run_with_retry(
      "k",
      &Retry::Always,
      &RetryDelay::Fixed(Duration::ZERO),
      |_| async { Err(QueryError::Cancelled) },
      |_, _| {
        failures.fetch_add(1, Ordering::SeqCst);
      },
    )
    .await;

    assert_eq!(result, Err(QueryError::Cancelled));
    assert_eq!(failures.load(Ordering::SeqCst), 0);
  }
}
