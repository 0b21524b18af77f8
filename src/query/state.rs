use std::fmt;
use std::sync::Arc;

use crate::error::QueryError;

/// Lifecycle status of a query or mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
  /// Not started, or disabled
  #[default]
  Idle,
  /// Waiting for the first outcome
  Loading,
  /// Last attempt chain failed
  Error,
  /// Last attempt chain succeeded
  Success,
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Status::Idle => "idle",
      Status::Loading => "loading",
      Status::Error => "error",
      Status::Success => "success",
    })
  }
}

/// The state of one query subscription.
pub struct QueryState<T> {
  pub data: Option<Arc<T>>,
  pub error: Option<QueryError>,
  pub status: Status,
  /// A fetch for this subscription is outstanding
  pub is_fetching: bool,
}

impl<T> QueryState<T> {
  pub(crate) fn initial(enabled: bool) -> Self {
    Self {
      data: None,
      error: None,
      status: if enabled { Status::Loading } else { Status::Idle },
      is_fetching: enabled,
    }
  }

  pub(crate) fn success(data: Arc<T>) -> Self {
    Self {
      data: Some(data),
      error: None,
      status: Status::Success,
      is_fetching: false,
    }
  }

  pub(crate) fn failure(error: QueryError) -> Self {
    Self {
      data: None,
      error: Some(error),
      status: Status::Error,
      is_fetching: false,
    }
  }

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

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }
}

impl<T> Clone for QueryState<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      error: self.error.clone(),
      status: self.status,
      is_fetching: self.is_fetching,
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for QueryState<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryState")
      .field("status", &self.status)
      .field("is_fetching", &self.is_fetching)
      .field("data", &self.data)
      .field("error", &self.error)
      .finish()
  }
}
