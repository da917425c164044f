//! Configuration for the persisting wrapper.

use chrono::Duration;
use std::fmt;
use std::sync::Arc;

use super::record::{deserialize_json, serialize_json, Deserializer, PersistedRecord, Serializer};
use super::storage::AsyncStorage;

/// Default storage key prefix.
pub const DEFAULT_PREFIX: &str = "qpersist";

/// Default maximum age of a persisted record (24 hours).
pub const DEFAULT_MAX_AGE_MS: i64 = 86_400_000;

/// Retry hook shape: `(failure_count, error) -> Option<record to persist>`.
///
/// Accepted in configuration but not invoked by the wrapper.
pub type PersistRetryer =
  Arc<dyn Fn(u32, &color_eyre::Report) -> Option<PersistedRecord> + Send + Sync>;

/// Options for persisting query results.
#[derive(Clone)]
pub struct PersistOptions {
  pub(crate) storage: Option<Arc<dyn AsyncStorage>>,
  pub(crate) buster: String,
  pub(crate) max_age: Duration,
  pub(crate) prefix: String,
  pub(crate) serialize: Serializer,
  pub(crate) deserialize: Deserializer,
  pub(crate) retry: Option<PersistRetryer>,
}

impl Default for PersistOptions {
  fn default() -> Self {
    Self {
      storage: None,
      buster: String::new(),
      max_age: Duration::milliseconds(DEFAULT_MAX_AGE_MS),
      prefix: DEFAULT_PREFIX.to_string(),
      serialize: Arc::new(serialize_json),
      deserialize: Arc::new(deserialize_json),
      retry: None,
    }
  }
}

impl PersistOptions {
  /// Options with no storage medium: every call fetches.
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the storage medium.
  pub fn with_storage(mut self, storage: Arc<dyn AsyncStorage>) -> Self {
    self.storage = Some(storage);
    self
  }

  /// Set the version tag. Records written under another tag are discarded.
  pub fn with_buster(mut self, buster: impl Into<String>) -> Self {
    self.buster = buster.into();
    self
  }

  /// Set how old a record may get before it is discarded.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  /// Set the prefix prepended to every storage key.
  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  /// Replace the record encoder.
  pub fn with_serializer(mut self, serialize: Serializer) -> Self {
    self.serialize = serialize;
    self
  }

  /// Replace the record decoder.
  pub fn with_deserializer(mut self, deserialize: Deserializer) -> Self {
    self.deserialize = deserialize;
    self
  }

  pub fn with_retry(mut self, retry: PersistRetryer) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn storage(&self) -> Option<&Arc<dyn AsyncStorage>> {
    self.storage.as_ref()
  }

  pub fn buster(&self) -> &str {
    &self.buster
  }

  pub fn max_age(&self) -> Duration {
    self.max_age
  }

  pub fn retry(&self) -> Option<&PersistRetryer> {
    self.retry.as_ref()
  }

  /// Storage key for a query hash.
  pub fn storage_key(&self, query_hash: &str) -> String {
    format!("{}-{}", self.prefix, query_hash)
  }
}

impl fmt::Debug for PersistOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PersistOptions")
      .field("storage", &self.storage.is_some())
      .field("buster", &self.buster)
      .field("max_age", &self.max_age)
      .field("prefix", &self.prefix)
      .field("retry", &self.retry.is_some())
      .finish_non_exhaustive()
  }
}
