//! In-memory query cache contract.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::state::QueryState;

/// The live query cache that persisted state is restored into.
pub trait QueryCache: Send + Sync {
  /// Current state for a query hash, if the cache knows the query.
  fn state(&self, query_hash: &str) -> Result<Option<QueryState>>;

  /// Create or replace the cache entry for a query from a restored snapshot.
  fn hydrate(&self, query_key: &Value, query_hash: &str, state: QueryState) -> Result<()>;
}

/// A cached query: its identity and current state.
#[derive(Debug, Clone)]
pub struct CachedQuery {
  pub query_key: Value,
  pub state: QueryState,
}

/// `QueryCache` backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryQueryCache {
  queries: Mutex<HashMap<String, CachedQuery>>,
}

impl MemoryQueryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Get the full cache entry for a query hash.
  pub fn get(&self, query_hash: &str) -> Result<Option<CachedQuery>> {
    let queries = self
      .queries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(queries.get(query_hash).cloned())
  }

  /// Record freshly fetched data for a query.
  pub fn set_data(&self, query_key: &Value, query_hash: &str, data: Value) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    self.hydrate(query_key, query_hash, QueryState::success(data, now))
  }

  /// Drop a query from the cache.
  pub fn remove(&self, query_hash: &str) -> Result<()> {
    let mut queries = self
      .queries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    queries.remove(query_hash);
    Ok(())
  }

  pub fn len(&self) -> Result<usize> {
    let queries = self
      .queries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(queries.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl QueryCache for MemoryQueryCache {
  fn state(&self, query_hash: &str) -> Result<Option<QueryState>> {
    Ok(self.get(query_hash)?.map(|cached| cached.state))
  }

  fn hydrate(&self, query_key: &Value, query_hash: &str, state: QueryState) -> Result<()> {
    let mut queries = self
      .queries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    queries.insert(
      query_hash.to_string(),
      CachedQuery {
        query_key: query_key.clone(),
        state,
      },
    );
    Ok(())
  }
}
