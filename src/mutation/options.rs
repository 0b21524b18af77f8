use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{QueryError, Result};
use crate::retry::{Retry, RetryDelay};

pub(crate) type MutateHook<V, C> = Arc<dyn Fn(&V) -> BoxFuture<'static, Result<C>> + Send + Sync>;
type SuccessFn<V, D, C> = Arc<dyn Fn(&D, &V, Option<&C>) + Send + Sync>;
type ErrorFn<V, C> = Arc<dyn Fn(&QueryError, &V, Option<&C>) + Send + Sync>;
type SettledFn<V, D, C> =
  Arc<dyn Fn(Option<&D>, Option<&QueryError>, &V, Option<&C>) + Send + Sync>;

/// Mutation configuration. Mutations do not retry unless asked to.
pub struct MutationOptions<V, D, C = ()> {
  pub retry: Retry,
  pub retry_delay: RetryDelay,
  pub(crate) on_mutate: Option<MutateHook<V, C>>,
  pub(crate) on_success: Option<SuccessFn<V, D, C>>,
  pub(crate) on_error: Option<ErrorFn<V, C>>,
  pub(crate) on_settled: Option<SettledFn<V, D, C>>,
}

impl<V, D, C> MutationOptions<V, D, C> {
  pub fn new() -> Self {
    Self {
      retry: Retry::Count(0),
      retry_delay: RetryDelay::Exponential,
      on_mutate: None,
      on_success: None,
      on_error: None,
      on_settled: None,
    }
  }

  pub fn with_retry(mut self, retry: impl Into<Retry>) -> Self {
    self.retry = retry.into();
    self
  }

  pub fn with_retry_delay(mut self, retry_delay: impl Into<RetryDelay>) -> Self {
    self.retry_delay = retry_delay.into();
    self
  }

  /// Optimistic hook run before every attempt; its result becomes the
  /// attempt's context.
  pub fn on_mutate<F>(mut self, f: F) -> Self
  where
    F: Fn(&V) -> C + Send + Sync + 'static,
    V: 'static,
    C: Send + 'static,
  {
    self.on_mutate = Some(Arc::new(move |variables: &V| {
      let context = f(variables);
      async move { Ok(context) }.boxed()
    }));
    self
  }

  /// Asynchronous optimistic hook. A failure counts as a failed attempt.
  pub fn on_mutate_async<F, Fut, E>(mut self, f: F) -> Self
  where
    F: Fn(&V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<C, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
    V: 'static,
    C: 'static,
  {
    self.on_mutate = Some(Arc::new(move |variables: &V| {
      let fut = f(variables);
      async move { fut.await.map_err(QueryError::transport) }.boxed()
    }));
    self
  }

  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(&D, &V, Option<&C>) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn on_error<F>(mut self, f: F) -> Self
  where
    F: Fn(&QueryError, &V, Option<&C>) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(f));
    self
  }

  pub fn on_settled<F>(mut self, f: F) -> Self
  where
    F: Fn(Option<&D>, Option<&QueryError>, &V, Option<&C>) + Send + Sync + 'static,
  {
    self.on_settled = Some(Arc::new(f));
    self
  }
}

impl<V, D, C> Default for MutationOptions<V, D, C> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V, D, C> Clone for MutationOptions<V, D, C> {
  fn clone(&self) -> Self {
    Self {
      retry: self.retry.clone(),
      retry_delay: self.retry_delay.clone(),
      on_mutate: self.on_mutate.clone(),
      on_success: self.on_success.clone(),
      on_error: self.on_error.clone(),
      on_settled: self.on_settled.clone(),
    }
  }
}

impl<V, D, C> fmt::Debug for MutationOptions<V, D, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MutationOptions")
      .field("retry", &self.retry)
      .field("retry_delay", &self.retry_delay)
      .field("on_mutate", &self.on_mutate.is_some())
      .finish_non_exhaustive()
  }
}
