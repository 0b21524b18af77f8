use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueryError;
use crate::retry::{Retry, RetryDelay};

/// Default time an entry survives without being rewritten.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// Default number of retries for a failing query.
pub const DEFAULT_QUERY_RETRY: u32 = 3;

type SuccessFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&QueryError) + Send + Sync>;
type SettledFn<T> = Arc<dyn Fn(Option<&T>, Option<&QueryError>) + Send + Sync>;

/// Whether activation refetches data that is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchOnMount {
  /// Only fetch when nothing is cached
  Never,
  /// Fetch when the cached value is stale
  #[default]
  IfStale,
  /// Always fetch
  Always,
}

impl From<bool> for RefetchOnMount {
  fn from(refetch: bool) -> Self {
    if refetch {
      Self::IfStale
    } else {
      Self::Never
    }
  }
}

/// Per-subscription query configuration.
pub struct QueryOptions<T> {
  /// When false the query never fetches on its own and stays idle
  pub enabled: bool,
  /// Age after which a cached value is refetched on activation
  pub stale_time: Duration,
  /// How long an entry lives after its last write; `None` never expires
  pub cache_time: Option<Duration>,
  pub refetch_on_mount: RefetchOnMount,
  pub retry: Retry,
  pub retry_delay: RetryDelay,
  pub(crate) on_success: Option<SuccessFn<T>>,
  pub(crate) on_error: Option<ErrorFn>,
  pub(crate) on_settled: Option<SettledFn<T>>,
}

impl<T> QueryOptions<T> {
  pub fn new() -> Self {
    Self {
      enabled: true,
      stale_time: Duration::ZERO,
      cache_time: Some(DEFAULT_CACHE_TIME),
      refetch_on_mount: RefetchOnMount::IfStale,
      retry: Retry::Count(DEFAULT_QUERY_RETRY),
      retry_delay: RetryDelay::Exponential,
      on_success: None,
      on_error: None,
      on_settled: None,
    }
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_cache_time(mut self, cache_time: Option<Duration>) -> Self {
    self.cache_time = cache_time;
    self
  }

  pub fn with_refetch_on_mount(mut self, refetch: impl Into<RefetchOnMount>) -> Self {
    self.refetch_on_mount = refetch.into();
    self
  }

  pub fn with_retry(mut self, retry: impl Into<Retry>) -> Self {
    self.retry = retry.into();
    self
  }

  pub fn with_retry_delay(mut self, retry_delay: impl Into<RetryDelay>) -> Self {
    self.retry_delay = retry_delay.into();
    self
  }

  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn on_error<F>(mut self, f: F) -> Self
  where
    F: Fn(&QueryError) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(f));
    self
  }

  pub fn on_settled<F>(mut self, f: F) -> Self
  where
    F: Fn(Option<&T>, Option<&QueryError>) + Send + Sync + 'static,
  {
    self.on_settled = Some(Arc::new(f));
    self
  }

  pub(crate) fn stale_time_millis(&self) -> u64 {
    self.stale_time.as_millis() as u64
  }

  pub(crate) fn cache_time_millis(&self) -> Option<u64> {
    self.cache_time.map(|d| d.as_millis() as u64)
  }

  /// Options whose change re-runs the activation logic.
  pub(crate) fn mount_deps(&self) -> (bool, Duration, RefetchOnMount) {
    (self.enabled, self.stale_time, self.refetch_on_mount)
  }
}

impl<T> Default for QueryOptions<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for QueryOptions<T> {
  fn clone(&self) -> Self {
    Self {
      enabled: self.enabled,
      stale_time: self.stale_time,
      cache_time: self.cache_time,
      refetch_on_mount: self.refetch_on_mount,
      retry: self.retry.clone(),
      retry_delay: self.retry_delay.clone(),
      on_success: self.on_success.clone(),
      on_error: self.on_error.clone(),
      on_settled: self.on_settled.clone(),
    }
  }
}

impl<T> fmt::Debug for QueryOptions<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryOptions")
      .field("enabled", &self.enabled)
      .field("stale_time", &self.stale_time)
      .field("cache_time", &self.cache_time)
      .field("refetch_on_mount", &self.refetch_on_mount)
      .field("retry", &self.retry)
      .field("retry_delay", &self.retry_delay)
      .finish_non_exhaustive()
  }
}
