//! Query identity and stable hashing.

use color_eyre::Result;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Structured key identifying a fetchable resource.
///
/// The identity is an opaque JSON value. Two identities that differ only in
/// the order of object keys hash to the same value.
pub trait QueryKey {
  /// JSON form of this key, stored alongside persisted records.
  fn identity(&self) -> Result<Value>;

  /// Human readable description for logs.
  fn description(&self) -> String;

  /// Stable hash of the identity, used as the storage key.
  fn cache_hash(&self) -> Result<String> {
    Ok(hash_identity(&self.identity()?))
  }
}

impl QueryKey for Value {
  fn identity(&self) -> Result<Value> {
    Ok(self.clone())
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

/// SHA256 hex digest of the canonical JSON encoding of `identity`.
pub fn hash_identity(identity: &Value) -> String {
  let canonical = canonicalize(identity).to_string();

  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  hex::encode(hasher.finalize())
}

/// Rebuild objects with keys in sorted order, recursively.
///
/// serde_json maps are already sorted unless the `preserve_order` feature is
/// enabled somewhere in the dependency graph; this keeps hashes stable either way.
fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      let mut sorted = Map::new();
      for (key, inner) in entries {
        sorted.insert(key.clone(), canonicalize(inner));
      }
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    other => other.clone(),
  }
}
