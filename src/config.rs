use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::persist::{
  AsyncStorage, DirStorage, MemoryStorage, PersistOptions, SqliteStorage, SyncAdapter,
  DEFAULT_MAX_AGE_MS, DEFAULT_PREFIX,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub storage: StorageConfig,
  /// Version tag; changing it invalidates every persisted record
  pub buster: String,
  pub max_age_ms: i64,
  /// Prefix for storage keys
  pub prefix: String,
  /// Directory for log files (defaults to the data directory)
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      storage: StorageConfig::default(),
      buster: String::new(),
      max_age_ms: DEFAULT_MAX_AGE_MS,
      prefix: DEFAULT_PREFIX.to_string(),
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  #[serde(default)]
  pub backend: StorageBackend,
  /// Database file or directory, depending on the backend
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// SQLite database in the data directory
  #[default]
  Sqlite,
  /// One file per record
  Directory,
  /// Process-local, lost on exit
  Memory,
  /// Persistence disabled
  None,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qpersist.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qpersist/config.yaml
  ///
  /// Defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("qpersist.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qpersist").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Check values that the YAML schema alone cannot express.
  pub fn validate(&self) -> Result<()> {
    if self.max_age_ms < 0 {
      return Err(eyre!("max_age_ms must not be negative"));
    }
    Ok(())
  }

  /// Open the configured storage medium, or `None` if persistence is disabled.
  pub fn open_storage(&self) -> Result<Option<Arc<dyn AsyncStorage>>> {
    let storage: Arc<dyn AsyncStorage> = match self.storage.backend {
      StorageBackend::None => return Ok(None),
      StorageBackend::Memory => Arc::new(SyncAdapter::new(MemoryStorage::new())),
      StorageBackend::Sqlite => {
        let storage = match &self.storage.path {
          Some(path) => SqliteStorage::open_at(path)?,
          None => SqliteStorage::open()?,
        };
        Arc::new(SyncAdapter::new(storage))
      }
      StorageBackend::Directory => {
        let root = match &self.storage.path {
          Some(path) => path.clone(),
          None => data_dir()?.join("items"),
        };
        Arc::new(DirStorage::new(root))
      }
    };

    Ok(Some(storage))
  }

  /// Build persistence options from this configuration.
  pub fn persist_options(&self) -> Result<PersistOptions> {
    self.validate()?;

    let options = PersistOptions::new()
      .with_buster(self.buster.clone())
      .with_max_age(chrono::Duration::milliseconds(self.max_age_ms))
      .with_prefix(self.prefix.clone());

    Ok(match self.open_storage()? {
      Some(storage) => options.with_storage(storage),
      None => options,
    })
  }

  /// Directory for log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log_dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(data_dir()?.join("logs")),
    }
  }
}

/// Application data directory.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("qpersist"))
}
