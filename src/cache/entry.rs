//! Cache entry types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};

use crate::error::{QueryError, Result};

/// Type-erased cached value. Queries downcast it back to their data type.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// A fetch in progress that any number of subscribers can await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<AnyValue>>>;

/// The single outstanding fetch for a key.
#[derive(Clone)]
pub struct InFlight {
  pub(crate) id: u64,
  pub(crate) future: SharedFetch,
  /// Timestamp of the entry before this fetch was published, restored if the
  /// fetch is abandoned.
  pub(crate) previous_timestamp: Option<u64>,
}

impl InFlight {
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn future(&self) -> SharedFetch {
    self.future.clone()
  }
}

/// State recorded for one key.
#[derive(Clone, Default)]
pub struct CacheEntry {
  pub(crate) value: Option<AnyValue>,
  pub(crate) promise: Option<InFlight>,
  pub(crate) error: Option<QueryError>,
  /// When the current state was recorded (clock milliseconds).
  pub(crate) timestamp: u64,
}

impl CacheEntry {
  pub fn value(&self) -> Option<&AnyValue> {
    self.value.as_ref()
  }

  /// The cached value as `T`, if present.
  pub fn value_as<T: Send + Sync + 'static>(&self, key: &str) -> Option<Result<Arc<T>>> {
    self.value.clone().map(|value| downcast(key, value))
  }

  pub fn promise(&self) -> Option<&InFlight> {
    self.promise.as_ref()
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }

  pub fn timestamp(&self) -> u64 {
    self.timestamp
  }

  pub fn is_fetching(&self) -> bool {
    self.promise.is_some()
  }

  /// Whether the entry is older than `stale_time` at `now`.
  pub fn is_stale(&self, now: u64, stale_time: u64) -> bool {
    now.saturating_sub(self.timestamp) > stale_time
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("has_value", &self.value.is_some())
      .field("fetch_id", &self.promise.as_ref().map(|p| p.id))
      .field("error", &self.error)
      .field("timestamp", &self.timestamp)
      .finish()
  }
}

/// A write into the cache. Every write stamps the entry with the current time.
pub enum CacheUpdate {
  /// Publish an in-flight fetch; any previous value and error are kept.
  Pending(InFlight),
  /// Replace the entry with a resolved value.
  Resolved(AnyValue),
  /// Replace the entry with a terminal error.
  Failed(QueryError),
}

pub(crate) fn downcast<T: Send + Sync + 'static>(key: &str, value: AnyValue) -> Result<Arc<T>> {
  value
    .downcast::<T>()
    .map_err(|_| QueryError::TypeMismatch {
      key: key.to_string(),
    })
}
