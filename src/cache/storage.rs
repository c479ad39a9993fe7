//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::net::HttpResponse;

/// Trait for cache storage backends.
///
/// `put` overwrites silently and `get` is a pure lookup. Callers treat writes
/// as fire-and-forget: a failed `put` is logged at the call site and swallowed,
/// since caching is an optimization rather than a correctness requirement.
pub trait CacheStorage: Send + Sync {
  /// Store a response under `partition`/`key`, replacing any previous value.
  fn put(&self, partition: &str, key: &str, response: &HttpResponse) -> Result<()>;

  /// Look up a response. Absent keys return `Ok(None)`.
  fn get(&self, partition: &str, key: &str) -> Result<Option<HttpResponse>>;

  /// Drop a whole partition and everything in it.
  fn delete_partition(&self, partition: &str) -> Result<()>;

  /// Drop every partition whose name is not in `expected`.
  /// Returns the names of the partitions that were removed.
  fn delete_all_except(&self, expected: &BTreeSet<String>) -> Result<Vec<String>>;

  /// Names of all partitions currently holding entries.
  fn partitions(&self) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_partition
    ON response_cache(partition);
"#;

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory cache, used in tests and when no data directory exists.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("relais").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStorage for SqliteStorage {
  fn put(&self, partition: &str, key: &str, response: &HttpResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (partition, request_key, data, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![partition, key, data],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<HttpResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data FROM response_cache WHERE partition = ? AND request_key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let data: Option<Vec<u8>> = stmt.query_row(params![partition, key], |row| row.get(0)).ok();

    match data {
      Some(data) => {
        let response = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        Ok(Some(response))
      }
      None => Ok(None),
    }
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    Ok(())
  }

  fn delete_all_except(&self, expected: &BTreeSet<String>) -> Result<Vec<String>> {
    let stale: Vec<String> = self
      .partitions()?
      .into_iter()
      .filter(|name| !expected.contains(name))
      .collect();

    for name in &stale {
      self.delete_partition(name)?;
    }

    Ok(stale)
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM response_cache ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }
}
