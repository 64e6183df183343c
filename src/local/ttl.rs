//! Key/value cache with per-item expiry.
//!
//! Items live in the persistent [`LocalStore`] under `key_prefix + key`. When
//! a write to the store fails (quota exceeded, storage disabled) the item is
//! kept in an in-memory map for the lifetime of the process instead. The two
//! stores are never migrated into each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LocalCacheConfig;
use crate::util::now_millis;

use super::store::LocalStore;

/// One cached value with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlItem {
  #[serde(rename = "data")]
  pub value: serde_json::Value,
  /// Milliseconds since the Unix epoch
  #[serde(rename = "timestamp")]
  pub stored_at: i64,
  #[serde(rename = "expiry")]
  pub ttl_ms: u64,
}

impl TtlItem {
  /// Logically absent once strictly more than `ttl_ms` has passed.
  pub fn is_expired(&self, now_ms: i64) -> bool {
    now_ms.saturating_sub(self.stored_at) > self.ttl_ms.min(i64::MAX as u64) as i64
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreUsage {
  pub count: usize,
  /// Serialized size in bytes
  pub size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TtlStats {
  pub persistent: StoreUsage,
  pub memory: StoreUsage,
}

pub struct TtlCache {
  store: Arc<dyn LocalStore>,
  memory: Mutex<HashMap<String, TtlItem>>,
  key_prefix: String,
  default_ttl_ms: u64,
}

impl TtlCache {
  pub fn new(store: Arc<dyn LocalStore>, config: &LocalCacheConfig) -> Self {
    if !store.probe() {
      warn!("Persistent storage unavailable, cache entries will be kept in memory");
    }

    Self {
      store,
      memory: Mutex::new(HashMap::new()),
      key_prefix: config.key_prefix.clone(),
      default_ttl_ms: config.default_ttl_ms,
    }
  }

  fn storage_key(&self, key: &str) -> String {
    format!("{}{}", self.key_prefix, key)
  }

  fn memory(&self) -> MutexGuard<'_, HashMap<String, TtlItem>> {
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store `value` under `key`, replacing any previous item.
  /// `ttl_ms` defaults to the configured TTL (24h).
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl_ms: Option<u64>) -> Result<()> {
    let value =
      serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.set_at(key, value, ttl_ms.unwrap_or(self.default_ttl_ms), now_millis());
    Ok(())
  }

  pub(crate) fn set_at(&self, key: &str, value: serde_json::Value, ttl_ms: u64, now_ms: i64) {
    let item = TtlItem {
      value,
      stored_at: now_ms,
      ttl_ms,
    };

    let persisted = serde_json::to_string(&item)
      .map_err(|e| eyre!("Failed to serialize cache item: {}", e))
      .and_then(|raw| {
        self
          .store
          .set_item(&self.storage_key(key), &raw)
          .map_err(|e| eyre!(e))
      });

    match persisted {
      Ok(()) => {
        // Persistent copy is authoritative from here on
        self.memory().remove(key);
      }
      Err(e) => {
        warn!(key = %key, error = %e, "Falling back to in-memory cache");
        // An older persisted copy would shadow the new value on read
        if let Err(e) = self.store.remove_item(&self.storage_key(key)) {
          warn!(key = %key, error = %e, "Failed to remove persisted cache item");
        }
        self.memory().insert(key.to_string(), item);
      }
    }
  }

  /// Value under `key`, or `None` when missing, expired or unreadable.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get_at(key, now_millis())?;
    match serde_json::from_value(value) {
      Ok(v) => Some(v),
      Err(e) => {
        debug!(key = %key, error = %e, "Cached value has unexpected shape");
        None
      }
    }
  }

  pub(crate) fn get_at(&self, key: &str, now_ms: i64) -> Option<serde_json::Value> {
    let item = self.read_item(key)?;

    if item.is_expired(now_ms) {
      self.remove(key);
      return None;
    }
    Some(item.value)
  }

  fn read_item(&self, key: &str) -> Option<TtlItem> {
    let storage_key = self.storage_key(key);
    match self.store.get_item(&storage_key) {
      Ok(Some(raw)) => match serde_json::from_str::<TtlItem>(&raw) {
        Ok(item) => return Some(item),
        Err(e) => {
          warn!(key = %key, error = %e, "Dropping corrupt cache item");
          if let Err(e) = self.store.remove_item(&storage_key) {
            warn!(key = %key, error = %e, "Failed to remove persisted cache item");
          }
        }
      },
      Ok(None) => {}
      Err(e) => warn!(key = %key, error = %e, "Persistent read failed, using memory cache"),
    }

    self.memory().get(key).cloned()
  }

  /// Remove `key` from both stores.
  pub fn remove(&self, key: &str) {
    if let Err(e) = self.store.remove_item(&self.storage_key(key)) {
      warn!(key = %key, error = %e, "Failed to remove persisted cache item");
    }
    self.memory().remove(key);
  }

  /// Delete every expired or corrupt item from both stores.
  /// Returns how many items were removed.
  pub fn sweep_expired(&self) -> usize {
    self.sweep_expired_at(now_millis())
  }

  pub(crate) fn sweep_expired_at(&self, now_ms: i64) -> usize {
    let mut removed = 0;

    match self.store.keys() {
      Ok(keys) => {
        for storage_key in keys.iter().filter(|k| k.starts_with(&self.key_prefix)) {
          let stale = match self.store.get_item(storage_key) {
            Ok(Some(raw)) => serde_json::from_str::<TtlItem>(&raw)
              .map(|item| item.is_expired(now_ms))
              .unwrap_or(true),
            Ok(None) => false,
            Err(_) => false,
          };
          if stale && self.store.remove_item(storage_key).is_ok() {
            removed += 1;
          }
        }
      }
      Err(e) => warn!(error = %e, "Could not list persisted cache items"),
    }

    let mut memory = self.memory();
    let before = memory.len();
    memory.retain(|_, item| !item.is_expired(now_ms));
    removed += before - memory.len();

    if removed > 0 {
      debug!(removed, "Swept expired cache items");
    }
    removed
  }

  pub fn stats(&self) -> TtlStats {
    let mut persistent = StoreUsage::default();
    if let Ok(keys) = self.store.keys() {
      for key in keys.iter().filter(|k| k.starts_with(&self.key_prefix)) {
        if let Ok(Some(raw)) = self.store.get_item(key) {
          persistent.count += 1;
          persistent.size += raw.len();
        }
      }
    }

    let memory = self.memory();
    let size = memory
      .iter()
      .map(|(k, item)| k.len() + serde_json::to_string(item).map(|s| s.len()).unwrap_or(0))
      .sum();

    TtlStats {
      persistent,
      memory: StoreUsage {
        count: memory.len(),
        size,
      },
    }
  }
}
