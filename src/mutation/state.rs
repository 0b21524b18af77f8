use std::fmt;
use std::sync::Arc;

use crate::error::QueryError;
use crate::query::Status;

/// The state of one mutation call site.
pub struct MutationState<V, D, C> {
  pub status: Status,
  pub data: Option<Arc<D>>,
  pub error: Option<QueryError>,
  /// Variables of the latest attempt
  pub variables: Option<Arc<V>>,
  /// Value returned by the optimistic hook for the latest attempt
  pub context: Option<Arc<C>>,
  /// Failed attempts of the latest `mutate` call
  pub failure_count: u32,
}

impl<V, D, C> MutationState<V, D, C> {
  pub fn is_idle(&self) -> bool {
    self.status == Status::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == Status::Loading
  }

  pub fn is_error(&self) -> bool {
    self.status == Status::Error
  }

  pub fn is_success(&self) -> bool {
    self.status == Status::Success
  }

  pub fn data(&self) -> Option<&D> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }

  pub fn variables(&self) -> Option<&V> {
    self.variables.as_deref()
  }

  pub fn context(&self) -> Option<&C> {
    self.context.as_deref()
  }
}

impl<V, D, C> Default for MutationState<V, D, C> {
  fn default() -> Self {
    Self {
      status: Status::Idle,
      data: None,
      error: None,
      variables: None,
      context: None,
      failure_count: 0,
    }
  }
}

impl<V, D, C> Clone for MutationState<V, D, C> {
  fn clone(&self) -> Self {
    Self {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      variables: self.variables.clone(),
      context: self.context.clone(),
      failure_count: self.failure_count,
    }
  }
}

impl<V: fmt::Debug, D: fmt::Debug, C: fmt::Debug> fmt::Debug for MutationState<V, D, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MutationState")
      .field("status", &self.status)
      .field("data", &self.data)
      .field("error", &self.error)
      .field("variables", &self.variables)
      .field("context", &self.context)
      .field("failure_count", &self.failure_count)
      .finish()
  }
}
