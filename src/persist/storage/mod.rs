//! Storage medium contract and backends.
//!
//! Storage is a string key/value store. Backends come in two shapes:
//! - `AsyncStorage` for media with native async I/O (e.g. `DirStorage`)
//! - `SyncStorage` for simple blocking stores, adapted with `SyncAdapter`

mod dir;
mod sqlite;

use color_eyre::{eyre::eyre, Result};
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Mutex;

pub use dir::DirStorage;
pub use sqlite::SqliteStorage;

/// Asynchronous key/value storage used for persisted queries.
pub trait AsyncStorage: Send + Sync {
  /// Read the value stored under `key`.
  fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Synchronous key/value storage.
pub trait SyncStorage: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;
}

/// Exposes a `SyncStorage` through the `AsyncStorage` contract.
///
/// Operations run inline on the calling task and resolve immediately.
#[derive(Debug, Default)]
pub struct SyncAdapter<S> {
  inner: S,
}

impl<S: SyncStorage> SyncAdapter<S> {
  pub fn new(inner: S) -> Self {
    Self { inner }
  }

  pub fn inner(&self) -> &S {
    &self.inner
  }
}

impl<S: SyncStorage> AsyncStorage for SyncAdapter<S> {
  fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
    future::ready(self.inner.get_item(key)).boxed()
  }

  fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
    future::ready(self.inner.set_item(key, &value)).boxed()
  }

  fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
    future::ready(self.inner.remove_item(key)).boxed()
  }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored items.
  pub fn len(&self) -> Result<usize> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl SyncStorage for MemoryStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.remove(key);
    Ok(())
  }
}
