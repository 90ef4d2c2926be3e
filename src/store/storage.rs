//! Key-value store trait with SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for key-value store backends.
///
/// Values are whole JSON documents. Implementations must be safe to share
/// between the cache and anything else holding the same store handle.
pub trait KvStore: Send + Sync {
  /// Get the value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &Value) -> Result<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// All keys starting with `prefix`, sorted.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

  /// Remove every key starting with `prefix`.
  fn clear_prefix(&self, prefix: &str) -> Result<()>;
}

/// Process-local store, lost when the process exits.
///
/// Values are kept serialized so reads hand back the same bytes that were
/// written, like browser local storage.
#[derive(Default)]
pub struct MemoryKvStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Raw serialized value, for asserting on what was actually written.
  pub fn raw(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  /// Store raw text under `key`, bypassing serialization.
  pub fn set_raw(&self, key: &str, raw: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.to_string(), raw.to_string());
    Ok(())
  }
}

impl KvStore for MemoryKvStore {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    match self.raw(key)? {
      Some(raw) => serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse stored value for {}: {}", key, e)),
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, value: &Value) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;
    self.set_raw(key, &raw)
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect(),
    )
  }

  fn clear_prefix(&self, prefix: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.retain(|k, _| !k.starts_with(prefix));
    Ok(())
  }
}

/// SQLite-based persistent store.
pub struct SqliteKvStore {
  conn: Mutex<Connection>,
}

impl SqliteKvStore {
  /// Open (or create) the store at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a store that lives only as long as this handle.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("palsync").join("store.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KvStore for SqliteKvStore {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let raw: Option<String> = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))?;

    match raw {
      Some(raw) => serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse stored value for {}: {}", key, e)),
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, value: &Value) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let raw = serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, raw],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;

    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT key FROM kv_store
         WHERE substr(key, 1, length(?1)) = ?1
         ORDER BY key",
      )
      .map_err(|e| eyre!("Failed to prepare key scan: {}", e))?;

    let keys = stmt
      .query_map(params![prefix], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to scan keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn clear_prefix(&self, prefix: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM kv_store WHERE substr(key, 1, length(?1)) = ?1",
        params![prefix],
      )
      .map_err(|e| eyre!("Failed to clear {}: {}", prefix, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn exercise(store: &dyn KvStore) {
    store.set("app:palette:b", &json!({"id": "b"})).unwrap();
    store.set("app:palette:a", &json!({"id": "a"})).unwrap();
    store.set("app:pending", &json!(["a"])).unwrap();
    store.set("other:palette:c", &json!({"id": "c"})).unwrap();

    assert_eq!(store.get("app:palette:a").unwrap(), Some(json!({"id": "a"})));
    assert_eq!(store.get("app:missing").unwrap(), None);

    let keys = store.keys_with_prefix("app:palette:").unwrap();
    assert_eq!(keys, vec!["app:palette:a", "app:palette:b"]);

    store.remove("app:palette:b").unwrap();
    store.remove("app:palette:b").unwrap();
    assert_eq!(store.get("app:palette:b").unwrap(), None);

    store.clear_prefix("app:").unwrap();
    assert!(store.keys_with_prefix("app:").unwrap().is_empty());
    assert_eq!(store.get("other:palette:c").unwrap(), Some(json!({"id": "c"})));
  }

  #[test]
  fn test_memory_store_operations() {
    exercise(&MemoryKvStore::new());
  }

  #[test]
  fn test_sqlite_store_operations() {
    exercise(&SqliteKvStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_set_replaces_value() {
    let store = SqliteKvStore::open_in_memory().unwrap();
    store.set("k", &json!(1)).unwrap();
    store.set("k", &json!({"v": 2})).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!({"v": 2})));
  }

  #[test]
  fn test_prefix_scan_treats_wildcards_literally() {
    let store = SqliteKvStore::open_in_memory().unwrap();
    store.set("a_b:1", &json!(1)).unwrap();
    store.set("axb:2", &json!(2)).unwrap();
    assert_eq!(store.keys_with_prefix("a_b:").unwrap(), vec!["a_b:1"]);
  }

  #[test]
  fn test_memory_store_rejects_corrupt_raw_value() {
    let store = MemoryKvStore::new();
    store.set_raw("k", "{not json").unwrap();
    assert!(store.get("k").is_err());
  }
}
