//! Directory-backed storage: one file per key.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::AsyncStorage;

/// Stores each item as a file named after the hex-encoded key.
#[derive(Debug, Clone)]
pub struct DirStorage {
  root: PathBuf,
}

impl DirStorage {
  /// Use `root` as the storage directory. It is created on first write.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn item_path(&self, key: &str) -> PathBuf {
    self.root.join(format!("{}.json", hex::encode(key)))
  }
}

impl AsyncStorage for DirStorage {
  fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
    async move {
      let path = self.item_path(key);
      match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(eyre!("Failed to read {}: {}", path.display(), e)),
      }
    }
    .boxed()
  }

  fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
    async move {
      tokio::fs::create_dir_all(&self.root)
        .await
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;

      let path = self.item_path(key);
      tokio::fs::write(&path, value)
        .await
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))
    }
    .boxed()
  }

  fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
    async move {
      let path = self.item_path(key);
      match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(eyre!("Failed to remove {}: {}", path.display(), e)),
      }
    }
    .boxed()
  }
}
