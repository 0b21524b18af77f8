//! Error types for query and mutation operations.

use thiserror::Error;

/// Errors surfaced by queries and mutations.
///
/// Cloneable because one terminal outcome of a shared fetch is observed by
/// every subscriber waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
  /// The fetch or mutation operation rejected.
  #[error("{0}")]
  Transport(String),

  /// The subscription was torn down before the operation settled.
  #[error("query was cancelled")]
  Cancelled,

  /// A cached value under this key was produced by a query of another type.
  #[error("cached value for key {key} has a different type")]
  TypeMismatch { key: String },

  /// A structured identity could not be turned into a query key.
  #[error("invalid query key: {0}")]
  InvalidKey(String),
}

impl QueryError {
  /// Normalize any displayable operation error into a transport error.
  pub fn transport(err: impl std::fmt::Display) -> Self {
    Self::Transport(err.to_string())
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

impl From<String> for QueryError {
  fn from(message: String) -> Self {
    Self::Transport(message)
  }
}

impl From<&str> for QueryError {
  fn from(message: &str) -> Self {
    Self::Transport(message.to_string())
  }
}

/// Result alias used throughout the crate.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;
