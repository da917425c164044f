//! Snapshot of a query's state as held by the query cache and persisted to storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result status of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
  /// No data yet
  #[default]
  Pending,
  /// Query completed successfully
  Success,
  /// Query failed with an error
  Error,
}

/// Whether a fetch is currently running for a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
  Fetching,
  Paused,
  #[default]
  Idle,
}

/// The state of a query.
///
/// Data is type-erased to JSON so a single cache can hold queries of any
/// result type. Timestamps are epoch milliseconds; `0` means "never".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default)]
  pub data_updated_at: i64,
  #[serde(default)]
  pub data_update_count: u32,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub error_updated_at: i64,
  #[serde(default)]
  pub error_update_count: u32,
  #[serde(default)]
  pub fetch_failure_count: u32,
  #[serde(default)]
  pub fetch_failure_reason: Option<String>,
  #[serde(default)]
  pub fetch_status: FetchStatus,
  #[serde(default)]
  pub is_invalidated: bool,
  #[serde(default)]
  pub status: QueryStatus,
}

impl QueryState {
  /// A success-shaped state holding freshly fetched data.
  ///
  /// Fetch bookkeeping (failure counters, error fields, fetch status) is reset.
  pub fn success(data: Value, updated_at: i64) -> Self {
    Self {
      data: Some(data),
      data_updated_at: updated_at,
      data_update_count: 1,
      status: QueryStatus::Success,
      ..Self::default()
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn has_data(&self) -> bool {
    self.data.is_some()
  }
}
