//! Durable key-value storage backends and the non-failing store facade.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::warn;

/// Failure inside a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("storage quota exceeded writing {key} ({needed} bytes)")]
  QuotaExceeded { key: String, needed: usize },

  #[error("storage backend failure: {0}")]
  Backend(String),

  #[error("storage lock poisoned")]
  Poisoned,
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    StorageError::Backend(e.to_string())
  }
}

/// Trait for string key-value storage backends.
pub trait StorageBackend: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

  fn remove(&self, key: &str) -> Result<(), StorageError>;

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Storage implementation that doesn't store anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopBackend;

impl StorageBackend for NoopBackend {
  fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<(), StorageError> {
    Ok(())
  }

  fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
    Ok(Vec::new())
  }
}

/// In-process backend with an optional byte quota.
#[derive(Default)]
pub struct MemoryBackend {
  entries: Mutex<BTreeMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit the total size of keys plus values, mimicking a browser-style store.
  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      quota_bytes: Some(quota_bytes),
    }
  }
}

impl StorageBackend for MemoryBackend {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;

    if let Some(quota) = self.quota_bytes {
      let used: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      let needed = key.len() + value.len();
      if used + needed > quota {
        return Err(StorageError::QuotaExceeded {
          key: key.to_string(),
          needed,
        });
      }
    }

    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    entries.remove(key);
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(
      entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect(),
    )
  }
}

/// SQLite-based key-value storage.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldsync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl StorageBackend for SqliteBackend {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let value = conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute(
      "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key")?;
    let keys = stmt
      .query_map(params![prefix.chars().count() as i64, prefix], |row| {
        row.get::<_, String>(0)
      })?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
  }
}

/// Store facade that never fails.
///
/// Every backend error is logged and turned into a miss or a no-op, so a broken
/// or full store degrades to "no cache" instead of breaking callers.
#[derive(Clone)]
pub struct DurableStore {
  backend: Arc<dyn StorageBackend>,
}

impl DurableStore {
  pub fn new(backend: impl StorageBackend + 'static) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  pub fn in_memory() -> Self {
    Self::new(MemoryBackend::new())
  }

  pub fn get(&self, key: &str) -> Option<String> {
    match self.backend.get(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "store read failed, treating as miss");
        None
      }
    }
  }

  /// Returns whether the write landed.
  pub fn set(&self, key: &str, value: &str) -> bool {
    match self.backend.set(key, value) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, error = %e, "store write failed");
        false
      }
    }
  }

  pub fn remove(&self, key: &str) {
    if let Err(e) = self.backend.remove(key) {
      warn!(key, error = %e, "store remove failed");
    }
  }

  pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
    match self.backend.keys_with_prefix(prefix) {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix, error = %e, "store key scan failed");
        Vec::new()
      }
    }
  }
}

#[cfg(test)]
pub(crate) fn temp_db_path(name: &str) -> PathBuf {
  use std::sync::atomic::{AtomicU32, Ordering};
  static COUNTER: AtomicU32 = AtomicU32::new(0);

  std::env::temp_dir().join(format!(
    "fieldsync-test-{}-{}-{}.db",
    name,
    std::process::id(),
    COUNTER.fetch_add(1, Ordering::SeqCst)
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memory_prefix_scan() {
    let store = DurableStore::in_memory();
    store.set("jobs_list:a", "1");
    store.set("jobs_list:b", "2");
    store.set("job_detail:a", "3");
    store.set("last_sync", "4");

    assert_eq!(
      store.keys_with_prefix("jobs_list:"),
      vec!["jobs_list:a".to_string(), "jobs_list:b".to_string()]
    );
  }

  #[test]
  fn test_quota_exceeded_is_swallowed() {
    let store = DurableStore::new(MemoryBackend::with_quota(16));
    assert!(store.set("k", "small"));
    assert!(!store.set("big", "this value will not fit"));
    assert_eq!(store.get("big"), None);
    assert_eq!(store.get("k").as_deref(), Some("small"));
  }

  #[test]
  fn test_noop_backend_always_misses() {
    let store = DurableStore::new(NoopBackend);
    assert!(store.set("k", "v"));
    assert_eq!(store.get("k"), None);
    assert!(store.keys_with_prefix("").is_empty());
  }

  #[test]
  fn test_sqlite_round_trip_and_reopen() {
    let path = temp_db_path("storage");
    {
      let store = DurableStore::new(SqliteBackend::open_at(&path).unwrap());
      store.set("jobs_list:x", "payload");
      store.set("job_detail:1", "detail");
      store.set("other", "o");
      store.remove("other");
    }

    let store = DurableStore::new(SqliteBackend::open_at(&path).unwrap());
    assert_eq!(store.get("jobs_list:x").as_deref(), Some("payload"));
    assert_eq!(store.get("other"), None);
    assert_eq!(store.keys_with_prefix("job_detail:"), vec!["job_detail:1"]);

    let _ = std::fs::remove_file(&path);
  }
}
