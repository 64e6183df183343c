use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::db::Database;

/// Errors from the persistent key/value store.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
  QuotaExceeded { needed: u64, quota: u64 },
  #[error("storage database error: {0}")]
  Database(#[from] rusqlite::Error),
  #[error("storage lock poisoned")]
  LockPoisoned,
}

/// String key/value storage that survives restarts.
pub trait LocalStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

  fn remove_item(&self, key: &str) -> Result<(), StorageError>;

  fn keys(&self) -> Result<Vec<String>, StorageError>;

  /// Write and remove a throwaway key to check the store is usable.
  fn probe(&self) -> bool {
    const PROBE_KEY: &str = "__storage_probe__";
    self.set_item(PROBE_KEY, PROBE_KEY).is_ok() && self.remove_item(PROBE_KEY).is_ok()
  }
}

/// `local_storage` table with an optional byte quota over keys + values.
pub struct SqliteLocalStore {
  conn: Arc<Mutex<Connection>>,
  quota_bytes: Option<u64>,
}

impl SqliteLocalStore {
  pub fn new(db: &Database, quota_bytes: Option<u64>) -> Self {
    Self {
      conn: db.connection(),
      quota_bytes,
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

impl LocalStore for SqliteLocalStore {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;

    if let Some(quota) = self.quota_bytes {
      let others: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
         FROM local_storage WHERE key != ?",
        params![key],
        |row| row.get(0),
      )?;
      let needed = others.max(0) as u64 + key.len() as u64 + value.len() as u64;
      if needed > quota {
        return Err(StorageError::QuotaExceeded { needed, quota });
      }
    }

    conn.execute(
      "INSERT OR REPLACE INTO local_storage (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM local_storage WHERE key = ?", params![key])?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key FROM local_storage ORDER BY key")?;
    let keys = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(keys)
  }
}
