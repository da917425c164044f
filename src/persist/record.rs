//! The record written to storage for each persisted query.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::query::QueryState;

/// A persisted query.
///
/// `timestamp` and `buster` are always set on write. They are optional here
/// so that legacy or hand-edited entries still decode and can be rejected
/// by the validity checks instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
  #[serde(default)]
  pub buster: Option<String>,
  /// Epoch milliseconds when the record was written
  #[serde(default)]
  pub timestamp: Option<i64>,
  pub query_hash: String,
  pub query_key: Value,
  pub state: QueryState,
}

impl PersistedRecord {
  /// Build a record for freshly fetched `data`, stamped with `now`.
  pub fn fresh(buster: &str, now: i64, query_key: Value, query_hash: String, data: Value) -> Self {
    Self {
      buster: Some(buster.to_string()),
      timestamp: Some(now),
      query_hash,
      query_key,
      state: QueryState::success(data, now),
    }
  }
}

/// Encodes a record into the string stored in the storage medium.
pub type Serializer = Arc<dyn Fn(&PersistedRecord) -> Result<String> + Send + Sync>;

/// Decodes a stored string back into a record.
pub type Deserializer = Arc<dyn Fn(&str) -> Result<PersistedRecord> + Send + Sync>;

/// JSON encoding of a record.
pub fn serialize_json(record: &PersistedRecord) -> Result<String> {
  serde_json::to_string(record).map_err(|e| eyre!("Failed to serialize record: {}", e))
}

/// JSON decoding of a record.
pub fn deserialize_json(raw: &str) -> Result<PersistedRecord> {
  serde_json::from_str(raw).map_err(|e| eyre!("Failed to deserialize record: {}", e))
}
