//! Persisting fetch wrapper.
//!
//! Wraps a query's fetch function so that:
//! 1. A valid persisted record short-circuits the fetch and is restored into
//!    the live query cache
//! 2. Expired, version-mismatched or malformed records are deleted
//! 3. Every live fetch result is written back to storage

use chrono::{TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::options::PersistOptions;
use super::record::PersistedRecord;
use super::result::CacheResult;
use crate::query::{QueryCache, QueryKey};

/// Persists query results to the configured storage medium.
#[derive(Clone)]
pub struct Persister {
  options: PersistOptions,
  cache: Arc<dyn QueryCache>,
}

impl Persister {
  /// Create a persister that restores into `cache`.
  pub fn new(options: PersistOptions, cache: Arc<dyn QueryCache>) -> Self {
    Self { options, cache }
  }

  pub fn options(&self) -> &PersistOptions {
    &self.options
  }

  /// Wrap `fetch` for the query identified by `query_key`.
  pub fn wrap<K, F>(&self, query_key: &K, fetch: F) -> Result<PersistedFetch<F>>
  where
    K: QueryKey + ?Sized,
  {
    Ok(PersistedFetch {
      persister: self.clone(),
      query_key: query_key.identity()?,
      query_hash: query_key.cache_hash()?,
      description: query_key.description(),
      fetch,
    })
  }

  /// Read the persisted record for `query_hash` if it is still valid.
  ///
  /// Records that fail to decode, lack a timestamp, are older than the max
  /// age or carry another buster are removed from storage and reported as
  /// absent.
  pub async fn retrieve_query(&self, query_hash: &str) -> Result<Option<PersistedRecord>> {
    let storage = match self.options.storage.as_ref() {
      Some(storage) => storage,
      None => return Ok(None),
    };

    let storage_key = self.options.storage_key(query_hash);
    trace!(key = %storage_key, "Reading persisted query");

    let raw = match storage.get_item(&storage_key).await? {
      Some(raw) => raw,
      None => return Ok(None),
    };

    let record = match (self.options.deserialize)(&raw) {
      Ok(record) => record,
      Err(e) => {
        warn!(key = %storage_key, "Discarding unreadable persisted query: {}", e);
        storage.remove_item(&storage_key).await?;
        return Ok(None);
      }
    };

    let now = Utc::now().timestamp_millis();
    if let Some(reason) = self.rejection(&record, now) {
      debug!(key = %storage_key, reason, "Discarding persisted query");
      storage.remove_item(&storage_key).await?;
      return Ok(None);
    }

    Ok(Some(record))
  }

  /// Write a fresh record for `data` under `query_hash`.
  ///
  /// No-op when no storage medium is configured.
  pub async fn persist_query<T>(&self, query_key: &Value, query_hash: &str, data: &T) -> Result<()>
  where
    T: Serialize + ?Sized,
  {
    let storage = match self.options.storage.as_ref() {
      Some(storage) => storage,
      None => return Ok(()),
    };

    let data =
      serde_json::to_value(data).map_err(|e| eyre!("Failed to serialize query data: {}", e))?;
    let record = PersistedRecord::fresh(
      &self.options.buster,
      Utc::now().timestamp_millis(),
      query_key.clone(),
      query_hash.to_string(),
      data,
    );
    let encoded = (self.options.serialize)(&record)?;

    let storage_key = self.options.storage_key(query_hash);
    trace!(key = %storage_key, "Writing persisted query");
    storage.set_item(&storage_key, encoded).await
  }

  /// Delete the persisted record for `query_hash`, if any.
  pub async fn remove_query(&self, query_hash: &str) -> Result<()> {
    match self.options.storage.as_ref() {
      Some(storage) => {
        storage
          .remove_item(&self.options.storage_key(query_hash))
          .await
      }
      None => Ok(()),
    }
  }

  /// Why a decoded record must be discarded, or `None` if it is valid.
  fn rejection(&self, record: &PersistedRecord, now: i64) -> Option<&'static str> {
    let timestamp = match record.timestamp {
      Some(timestamp) => timestamp,
      None => return Some("missing timestamp"),
    };

    let age = match now.checked_sub(timestamp) {
      Some(age) if age < 0 => return Some("timestamp in the future"),
      Some(age) => age,
      None => return Some("timestamp out of range"),
    };

    if age > self.options.max_age.num_milliseconds() {
      return Some("expired");
    }

    if record.buster.as_deref() != Some(self.options.buster.as_str()) {
      return Some("buster mismatch");
    }

    None
  }

  /// Restore a persisted result into the live cache.
  ///
  /// Skipped when storage is absent or the cache already holds data.
  async fn restore<T>(&self, query_key: &Value, query_hash: &str) -> Result<Option<CacheResult<T>>>
  where
    T: DeserializeOwned,
  {
    if self.options.storage.is_none() {
      return Ok(None);
    }

    if let Some(state) = self.cache.state(query_hash)? {
      if state.has_data() {
        return Ok(None);
      }
    }

    let record = match self.retrieve_query(query_hash).await? {
      Some(record) => record,
      None => return Ok(None),
    };

    let raw_data = record.state.data.clone().unwrap_or(Value::Null);
    let data: T = match serde_json::from_value(raw_data) {
      Ok(data) => data,
      Err(e) => {
        warn!(hash = %query_hash, "Discarding persisted query with unexpected data: {}", e);
        self.remove_query(query_hash).await?;
        return Ok(None);
      }
    };

    let cached_at = record
      .timestamp
      .and_then(|ts| Utc.timestamp_millis_opt(ts).single());
    self.cache.hydrate(query_key, query_hash, record.state)?;

    Ok(Some(CacheResult::from_storage(data, cached_at)))
  }
}

/// A fetch function bound to a query identity and a `Persister`.
pub struct PersistedFetch<F> {
  persister: Persister,
  query_key: Value,
  query_hash: String,
  description: String,
  fetch: F,
}

impl<F> PersistedFetch<F> {
  pub fn query_hash(&self) -> &str {
    &self.query_hash
  }

  /// Run the query, serving a valid persisted record or fetching and
  /// persisting a fresh result.
  pub async fn run<C, T, Fut>(&self, ctx: C) -> Result<CacheResult<T>>
  where
    F: Fn(C) -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Serialize + DeserializeOwned,
  {
    if let Some(restored) = self
      .persister
      .restore::<T>(&self.query_key, &self.query_hash)
      .await?
    {
      debug!(query = %self.description, "Restored persisted query");
      return Ok(restored);
    }

    debug!(query = %self.description, "Fetching query");
    let data = (self.fetch)(ctx).await?;

    self
      .persister
      .persist_query(&self.query_key, &self.query_hash, &data)
      .await?;

    Ok(CacheResult::from_network(data))
  }

  /// Like [`run`](Self::run), returning only the data.
  pub async fn call<C, T, Fut>(&self, ctx: C) -> Result<T>
  where
    F: Fn(C) -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Serialize + DeserializeOwned,
  {
    self.run(ctx).await.map(|result| result.data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::persist::record::serialize_json;
  use crate::persist::storage::{MemoryStorage, SyncAdapter, SyncStorage};
  use crate::persist::CacheSource;
  use crate::query::{MemoryQueryCache, QueryState};
  use chrono::Duration;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  /// Memory storage that counts operations.
  #[derive(Default)]
  struct CountingStorage {
    items: MemoryStorage,
    gets: AtomicU32,
    sets: AtomicU32,
    removes: AtomicU32,
  }

  impl CountingStorage {
    fn ops(&self) -> (u32, u32, u32) {
      (
        self.gets.load(Ordering::SeqCst),
        self.sets.load(Ordering::SeqCst),
        self.removes.load(Ordering::SeqCst),
      )
    }
  }

  impl SyncStorage for CountingStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
      self.gets.fetch_add(1, Ordering::SeqCst);
      self.items.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
      self.sets.fetch_add(1, Ordering::SeqCst);
      self.items.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
      self.removes.fetch_add(1, Ordering::SeqCst);
      self.items.remove_item(key)
    }
  }

  /// Storage whose reads always fail.
  struct BrokenStorage;

  impl SyncStorage for BrokenStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
      Err(eyre!("disk on fire"))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("disk on fire"))
    }

    fn remove_item(&self, _key: &str) -> Result<()> {
      Err(eyre!("disk on fire"))
    }
  }

  struct Harness {
    storage: Arc<SyncAdapter<CountingStorage>>,
    cache: Arc<MemoryQueryCache>,
    persister: Persister,
    calls: Arc<AtomicU32>,
  }

  impl Harness {
    fn new(buster: &str, max_age: Duration) -> Self {
      let storage = Arc::new(SyncAdapter::new(CountingStorage::default()));
      let cache = Arc::new(MemoryQueryCache::new());
      let options = PersistOptions::new()
        .with_storage(storage.clone())
        .with_buster(buster)
        .with_max_age(max_age);

      Self {
        persister: Persister::new(options, cache.clone()),
        storage,
        cache,
        calls: Arc::new(AtomicU32::new(0)),
      }
    }

    /// Fetch function returning `value` and counting invocations.
    fn fetcher(
      &self,
      value: Value,
    ) -> impl Fn(()) -> futures::future::Ready<Result<Value>> {
      let calls = self.calls.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(value.clone()))
      }
    }

    /// Put a raw string in storage without counting it.
    fn seed_raw(&self, query_hash: &str, raw: &str) {
      let key = self.persister.options().storage_key(query_hash);
      self.storage.inner().items.set_item(&key, raw).unwrap();
    }

    fn seed(&self, record: &PersistedRecord) {
      self.seed_raw(&record.query_hash, &serialize_json(record).unwrap());
    }

    fn stored(&self, query_hash: &str) -> Option<PersistedRecord> {
      let key = self.persister.options().storage_key(query_hash);
      self
        .storage
        .inner()
        .items
        .get_item(&key)
        .unwrap()
        .map(|raw| crate::persist::record::deserialize_json(&raw).unwrap())
    }

    fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }
  }

  fn record_aged(buster: &str, age_ms: i64, key: &Value, data: Value) -> PersistedRecord {
    let now = Utc::now().timestamp_millis();
    PersistedRecord::fresh(
      buster,
      now - age_ms,
      key.clone(),
      key.cache_hash().unwrap(),
      data,
    )
  }

  #[tokio::test]
  async fn test_valid_record_skips_fetch() {
    let h = Harness::new("v1", Duration::hours(24));
    let key = json!(["todos", {"page": 1}]);
    h.seed(&record_aged("v1", 60_000, &key, json!(["persisted"])));

    let wrapped = h.persister.wrap(&key, h.fetcher(json!(["fresh"]))).unwrap();
    let result = wrapped.run(()).await.unwrap();

    assert_eq!(result.data, json!(["persisted"]));
    assert_eq!(result.source, CacheSource::Storage);
    assert!(result.cached_at.is_some());
    assert_eq!(h.calls(), 0);

    // Restored into the live cache
    let state = h.cache.state(wrapped.query_hash()).unwrap().unwrap();
    assert_eq!(state.data, Some(json!(["persisted"])));
    let (_, sets, removes) = h.storage.inner().ops();
    assert_eq!((sets, removes), (0, 0));
  }

  #[tokio::test]
  async fn test_expired_record_is_removed_and_refetched() {
    let h = Harness::new("v1", Duration::hours(1));
    let key = json!(["todos"]);
    let hash = key.cache_hash().unwrap();
    h.seed(&record_aged("v1", 2 * 60 * 60 * 1000, &key, json!("old")));

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("new"))).unwrap();
    let data: Value = wrapped.call(()).await.unwrap();

    assert_eq!(data, json!("new"));
    assert_eq!(h.calls(), 1);
    let (_, sets, removes) = h.storage.inner().ops();
    assert_eq!((sets, removes), (1, 1));

    let stored = h.stored(&hash).unwrap();
    assert_eq!(stored.state.data, Some(json!("new")));
    // Fetched data is not hydrated by the wrapper
    assert!(h.cache.state(&hash).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_buster_mismatch_behaves_like_expiry() {
    let h = Harness::new("v2", Duration::hours(24));
    let key = json!(["todos"]);
    let hash = key.cache_hash().unwrap();
    h.seed(&record_aged("v1", 0, &key, json!("old")));

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("new"))).unwrap();
    let result = wrapped.run(()).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops().2, 1);
    assert_eq!(h.stored(&hash).unwrap().buster.as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_missing_buster_is_a_mismatch() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["todos"]);
    let mut record = record_aged("", 0, &key, json!("old"));
    record.buster = None;
    h.seed(&record);

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("new"))).unwrap();
    assert_eq!(wrapped.call(()).await.unwrap(), json!("new"));
    assert_eq!(h.calls(), 1);
  }

  #[tokio::test]
  async fn test_missing_timestamp_is_removed() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["legacy"]);
    let hash = key.cache_hash().unwrap();
    let raw = json!({
      "buster": "",
      "queryHash": hash,
      "queryKey": key,
      "state": {"data": "legacy", "status": "success"}
    });
    h.seed_raw(&hash, &raw.to_string());

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("new"))).unwrap();
    let data = wrapped.call(()).await.unwrap();

    assert_eq!(data, json!("new"));
    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops().2, 1);
    assert!(h.stored(&hash).unwrap().timestamp.is_some());
  }

  #[tokio::test]
  async fn test_unreadable_record_is_removed() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["broken"]);
    let hash = key.cache_hash().unwrap();
    h.seed_raw(&hash, "{not json");

    let wrapped = h.persister.wrap(&key, h.fetcher(json!(1))).unwrap();
    assert_eq!(wrapped.call(()).await.unwrap(), json!(1));
    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops(), (1, 1, 1));
  }

  #[tokio::test]
  async fn test_data_of_wrong_type_is_removed() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["numbers"]);
    h.seed(&record_aged("", 0, &key, json!("not a list")));

    let calls = h.calls.clone();
    let wrapped = h
      .persister
      .wrap(&key, move |_: ()| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, color_eyre::Report>(vec![1u32, 2, 3]) }
      })
      .unwrap();
    let data: Vec<u32> = wrapped.call(()).await.unwrap();

    assert_eq!(data, vec![1, 2, 3]);
    assert_eq!(h.calls(), 1);
    assert!(h.cache.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_max_age_scenario() {
    let h = Harness::new("v1", Duration::milliseconds(1000));
    let key = json!(["scenario"]);
    let hash = key.cache_hash().unwrap();

    // Young record is served
    h.seed(&record_aged("v1", 500, &key, json!("cached")));
    let wrapped = h.persister.wrap(&key, h.fetcher(json!("fetched"))).unwrap();
    assert_eq!(wrapped.call(()).await.unwrap(), json!("cached"));
    assert_eq!(h.calls(), 0);

    // Old record is replaced
    h.cache.remove(&hash).unwrap();
    h.seed(&record_aged("v1", 2000, &key, json!("cached")));
    let before = Utc::now().timestamp_millis();
    assert_eq!(wrapped.call(()).await.unwrap(), json!("fetched"));
    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops().2, 1);

    let stored = h.stored(&hash).unwrap();
    assert_eq!(stored.buster.as_deref(), Some("v1"));
    assert!(stored.timestamp.unwrap() >= before);
    assert_eq!(stored.state.data, Some(json!("fetched")));
  }

  #[tokio::test]
  async fn test_without_storage_always_fetches() {
    let cache = Arc::new(MemoryQueryCache::new());
    let persister = Persister::new(PersistOptions::new(), cache.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let wrapped = persister
      .wrap(&json!(["todos"]), move |page: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, color_eyre::Report>(page * 10) }
      })
      .unwrap();

    assert_eq!(wrapped.call(1).await.unwrap(), 10);
    assert_eq!(wrapped.call(2).await.unwrap(), 20);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty().unwrap());
    assert!(persister.retrieve_query(wrapped.query_hash()).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cached_data_skips_storage_lookup() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["todos"]);
    let hash = key.cache_hash().unwrap();
    h.cache
      .hydrate(&key, &hash, QueryState::success(json!("in memory"), 1))
      .unwrap();
    h.seed(&record_aged("", 0, &key, json!("persisted")));

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("fresh"))).unwrap();
    assert_eq!(wrapped.call(()).await.unwrap(), json!("fresh"));

    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops(), (0, 1, 0));
    assert_eq!(h.stored(&hash).unwrap().state.data, Some(json!("fresh")));
  }

  #[tokio::test]
  async fn test_fetch_error_propagates_without_write() {
    let h = Harness::new("", Duration::hours(24));
    let wrapped = h
      .persister
      .wrap(&json!(["fails"]), |_: ()| async {
        Err::<Value, _>(eyre!("upstream unavailable"))
      })
      .unwrap();

    let err = wrapped.call(()).await.unwrap_err();
    assert_eq!(err.to_string(), "upstream unavailable");
    assert_eq!(h.storage.inner().ops(), (1, 0, 0));
  }

  #[tokio::test]
  async fn test_storage_error_propagates() {
    let options = PersistOptions::new().with_storage(Arc::new(SyncAdapter::new(BrokenStorage)));
    let persister = Persister::new(options, Arc::new(MemoryQueryCache::new()));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let wrapped = persister
      .wrap(&json!(["todos"]), move |_: ()| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, color_eyre::Report>(json!(1)) }
      })
      .unwrap();

    let err = wrapped.call(()).await.unwrap_err();
    assert!(err.to_string().contains("disk on fire"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_custom_codec_is_used() {
    let storage = Arc::new(SyncAdapter::new(MemoryStorage::new()));
    let options = PersistOptions::new()
      .with_storage(storage.clone())
      .with_prefix("app")
      .with_serializer(Arc::new(|record: &PersistedRecord| -> Result<String> {
        Ok(format!("v1:{}", serialize_json(record)?))
      }))
      .with_deserializer(Arc::new(|raw: &str| -> Result<PersistedRecord> {
        let body = raw
          .strip_prefix("v1:")
          .ok_or_else(|| eyre!("unknown record format"))?;
        crate::persist::record::deserialize_json(body)
      }));
    let persister = Persister::new(options, Arc::new(MemoryQueryCache::new()));

    let key = json!(["codec"]);
    let hash = key.cache_hash().unwrap();
    persister.persist_query(&key, &hash, "hello").await.unwrap();

    let raw = storage.inner().get_item(&format!("app-{}", hash)).unwrap().unwrap();
    assert!(raw.starts_with("v1:"));

    let record = persister.retrieve_query(&hash).await.unwrap().unwrap();
    assert_eq!(record.state.data, Some(json!("hello")));
    assert_eq!(record.query_key, key);

    persister.remove_query(&hash).await.unwrap();
    assert!(storage.inner().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_equivalent_keys_share_a_record() {
    let h = Harness::new("", Duration::hours(24));
    let first: Value = serde_json::from_str(r#"{"user": 1, "tab": "posts"}"#).unwrap();
    let second: Value = serde_json::from_str(r#"{"tab": "posts", "user": 1}"#).unwrap();

    let wrapped = h.persister.wrap(&first, h.fetcher(json!("data"))).unwrap();
    wrapped.call(()).await.unwrap();

    let again = h.persister.wrap(&second, h.fetcher(json!("other"))).unwrap();
    assert_eq!(again.call(()).await.unwrap(), json!("data"));
    assert_eq!(h.calls(), 1);
  }

  #[tokio::test]
  async fn test_out_of_range_timestamp_is_removed() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["ancient"]);
    let hash = key.cache_hash().unwrap();
    let mut record = record_aged("", 0, &key, json!("old"));
    record.timestamp = Some(i64::MIN);
    h.seed(&record);

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("new"))).unwrap();
    assert_eq!(wrapped.call(()).await.unwrap(), json!("new"));

    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops(), (1, 1, 1));
    assert!(h.stored(&hash).unwrap().timestamp.unwrap() > 0);
  }

  #[tokio::test]
  async fn test_future_timestamp_is_removed() {
    let h = Harness::new("", Duration::hours(24));
    let key = json!(["from the future"]);
    let mut record = record_aged("", 0, &key, json!("old"));
    record.timestamp = Some(i64::MAX);
    h.seed(&record);

    let wrapped = h.persister.wrap(&key, h.fetcher(json!("new"))).unwrap();
    assert_eq!(wrapped.call(()).await.unwrap(), json!("new"));
    assert_eq!(h.calls(), 1);
    assert_eq!(h.storage.inner().ops().2, 1);
  }

  #[test]
  fn test_rejection_at_max_age_boundary() {
    let h = Harness::new("v1", Duration::milliseconds(1000));
    let key = json!(["boundary"]);
    let now = 1_700_000_000_000;
    let at = |timestamp: i64| {
      let mut record = record_aged("v1", 0, &key, json!(1));
      record.timestamp = Some(timestamp);
      record
    };

    assert_eq!(h.persister.rejection(&at(now), now), None);
    assert_eq!(h.persister.rejection(&at(now - 1000), now), None);
    assert_eq!(h.persister.rejection(&at(now - 1001), now), Some("expired"));
    assert_eq!(
      h.persister.rejection(&at(now + 1), now),
      Some("timestamp in the future")
    );
    assert_eq!(
      h.persister.rejection(&at(i64::MIN), now),
      Some("timestamp out of range")
    );
  }
}
