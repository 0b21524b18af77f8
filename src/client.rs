//! Application-level entry point that hands one cache to every query.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{AnyValue, CacheUpdate, QueryCache};
use crate::clock::Clock;
use crate::key::QueryKey;
use crate::mutation::{Mutation, MutationOptions};
use crate::query::{Query, QueryOptions};
use crate::signal::AbortSignal;

/// Owns the shared [`QueryCache`] and builds queries and mutations on it.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone, Default)]
pub struct QueryClient {
  cache: QueryCache,
}

impl QueryClient {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_clock(clock: impl Clock + 'static) -> Self {
    Self {
      cache: QueryCache::with_clock(clock),
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Create an inactive query subscription on this client's cache.
  pub fn query<T, F, Fut, E>(
    &self,
    key: impl Into<QueryKey>,
    fetcher: F,
    options: QueryOptions<T>,
  ) -> Query<T>
  where
    T: Send + Sync + 'static,
    F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
  {
    Query::new(self.cache.clone(), key, fetcher, options)
  }

  pub fn mutation<V, D, C, F, Fut, E>(
    &self,
    mutation_fn: F,
    options: MutationOptions<V, D, C>,
  ) -> Mutation<V, D, C>
  where
    V: Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
    C: Send + Sync + 'static,
    F: Fn(V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
  {
    Mutation::new(mutation_fn, options)
  }

  /// Drop the cached entry for `key` so the next activation fetches.
  ///
  /// A fetch already in flight keeps running and its subscribers still get
  /// its outcome, but it no longer dedups new subscribers.
  pub fn invalidate(&self, key: impl Into<QueryKey>) -> bool {
    let key = key.into();
    let removed = self.cache.delete(key.serialize());
    debug!(key = %key, removed, "invalidated");
    removed
  }

  /// Cached value for `key`, if present and of type `T`.
  pub fn get_query_data<T: Send + Sync + 'static>(&self, key: impl Into<QueryKey>) -> Option<Arc<T>> {
    let key = key.into();
    let entry = self.cache.get(key.serialize())?;
    entry.value_as::<T>(key.serialize())?.ok()
  }

  /// Write `value` as the successful result for `key`, as if a fetch had
  /// just resolved with it.
  pub fn set_query_data<T: Send + Sync + 'static>(&self, key: impl Into<QueryKey>, value: T) {
    let key = key.into();
    self
      .cache
      .put(key.serialize(), CacheUpdate::Resolved(Arc::new(value) as AnyValue));
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("entries", &self.cache.len())
      .finish()
  }
}
