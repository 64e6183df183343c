//! SQLite implementation of the response cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::Database;
use crate::net::Response;

use super::traits::{CacheEntry, CacheStore};

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
  pub fn new(db: &Database) -> Self {
    Self {
      conn: db.connection(),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const ENTRY_COLUMNS: &str = "e.request_key, e.status, e.headers, e.body, e.url, e.stored_at";

fn ensure_namespace(conn: &Connection, namespace: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?, ?)",
      params![namespace, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", namespace, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, namespace: &str, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (namespace, request_key, status, headers, body, url, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        entry.request_key,
        entry.response.status,
        headers,
        entry.response.body,
        entry.response.url,
        entry.stored_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", entry.request_key, e))?;
  Ok(())
}

/// Raw row, decoded outside the rusqlite closure so errors carry context
struct EntryRow {
  request_key: String,
  status: u16,
  headers: String,
  body: Vec<u8>,
  url: String,
  stored_at: String,
}

impl EntryRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      request_key: row.get(0)?,
      status: row.get(1)?,
      headers: row.get(2)?,
      body: row.get(3)?,
      url: row.get(4)?,
      stored_at: row.get(5)?,
    })
  }

  fn into_entry(self) -> Result<CacheEntry> {
    let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Corrupt headers for {}: {}", self.request_key, e))?;

    Ok(CacheEntry {
      response: Response {
        status: self.status,
        headers,
        body: self.body,
        url: self.url,
      },
      stored_at: parse_datetime(&self.stored_at)?,
      request_key: self.request_key,
    })
  }
}

impl CacheStore for SqliteStore {
  fn open(&self, namespace: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_namespace(&conn, namespace)
  }

  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_namespace(&tx, namespace)?;
    insert_entry(&tx, namespace, entry)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_all(&self, namespace: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_namespace(&tx, namespace)?;
    for entry in entries {
      // Dropping `tx` on error rolls everything back
      insert_entry(&tx, namespace, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn match_any(&self, request_key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries e
           INNER JOIN cache_namespaces n ON n.name = e.namespace
           WHERE e.request_key = ?
           ORDER BY n.position
           LIMIT 1",
          ENTRY_COLUMNS
        ),
        params![request_key],
        EntryRow::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {}: {}", request_key, e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn keys(&self, namespace: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE namespace = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", namespace, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }

  fn delete_namespaces(&self, names: &[String]) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut removed = 0;
    for name in names {
      tx.execute("DELETE FROM cache_entries WHERE namespace = ?", params![name])
        .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
      removed += tx
        .execute("DELETE FROM cache_namespaces WHERE name = ?", params![name])
        .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Look up a key in one namespace.
  pub fn lookup(&self, namespace: &str, request_key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries e WHERE e.namespace = ? AND e.request_key = ?",
          ENTRY_COLUMNS
        ),
        params![namespace, request_key],
        EntryRow::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request_key, e))?;

    row.map(EntryRow::into_entry).transpose()
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
