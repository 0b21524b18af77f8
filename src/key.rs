//! Query identities and their canonical serialized form.
//!
//! A [`QueryKey`] is either a plain string or an ordered sequence of
//! JSON-compatible values (`["user", 1]`). Two keys are the same cache slot
//! iff their serialized JSON text is equal.
//!
//! `serde_json` keeps object fields ordered by name, so structured parts like
//! `{"page": 1, "limit": 5}` and `{"limit": 5, "page": 1}` serialize the same.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

use crate::error::{QueryError, Result};

/// Build a sequence key from a list of serializable parts.
///
/// ```ignore
/// let key = query_key!["user", user_id];
/// ```
#[macro_export]
macro_rules! query_key {
  ($($part:tt)*) => {
    $crate::QueryKey::from($crate::__serde_json::json!([$($part)*]))
  };
}

/// Opaque identity of a query.
#[derive(Clone)]
pub struct QueryKey {
  value: Value,
  serialized: String,
}

impl QueryKey {
  /// Build a key from any serializable identity.
  pub fn new<S: Serialize>(identity: S) -> Result<Self> {
    let value =
      serde_json::to_value(identity).map_err(|e| QueryError::InvalidKey(e.to_string()))?;
    Ok(Self::from(value))
  }

  /// Canonical cache key string.
  pub fn serialize(&self) -> &str {
    &self.serialized
  }

  /// The structured identity this key was built from.
  pub fn value(&self) -> &Value {
    &self.value
  }
}

/// Deterministic mapping from a structured identity to a cache key string.
pub fn serialize(value: &Value) -> String {
  value.to_string()
}

impl From<Value> for QueryKey {
  fn from(value: Value) -> Self {
    let serialized = serialize(&value);
    Self { value, serialized }
  }
}

impl From<&str> for QueryKey {
  fn from(key: &str) -> Self {
    Self::from(Value::String(key.to_string()))
  }
}

impl From<String> for QueryKey {
  fn from(key: String) -> Self {
    Self::from(Value::String(key))
  }
}

impl From<Vec<Value>> for QueryKey {
  fn from(parts: Vec<Value>) -> Self {
    Self::from(Value::Array(parts))
  }
}

impl PartialEq for QueryKey {
  fn eq(&self, other: &Self) -> bool {
    self.serialized == other.serialized
  }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.serialized.hash(state);
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.serialized)
  }
}

impl fmt::Debug for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("QueryKey").field(&self.serialized).finish()
  }
}
