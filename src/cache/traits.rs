//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::net::Response;

/// A cached response, owned by the namespace it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Request URL without fragment
  pub request_key: String,
  pub response: Response,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(request_key: impl Into<String>, response: Response) -> Self {
    Self {
      request_key: request_key.into(),
      response,
      stored_at: Utc::now(),
    }
  }
}

/// Number of entries in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
  pub name: String,
  pub count: usize,
}

/// Storage for named response caches.
///
/// Namespaces are kept in creation order; [`CacheStore::match_any`] searches
/// them in that order.
pub trait CacheStore: Send + Sync {
  /// Create the namespace if it does not exist yet.
  fn open(&self, namespace: &str) -> Result<()>;

  /// Store one entry, overwriting any entry under the same key.
  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()>;

  /// Store many entries atomically: either all are written or none.
  fn put_all(&self, namespace: &str, entries: &[CacheEntry]) -> Result<()>;

  /// Look up a key across all namespaces, oldest namespace first.
  fn match_any(&self, request_key: &str) -> Result<Option<CacheEntry>>;

  /// All namespace names, in creation order.
  fn names(&self) -> Result<Vec<String>>;

  /// Request keys stored in a namespace.
  fn keys(&self, namespace: &str) -> Result<Vec<String>>;

  /// Delete the given namespaces and their entries in one step.
  /// Returns how many namespaces existed and were removed.
  fn delete_namespaces(&self, names: &[String]) -> Result<usize>;
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Cached entry for the request itself
  Cache,
  /// Offline navigation answered with the cached app shell
  AppShell,
  /// Offline navigation with nothing cached; generated document
  OfflineShell,
  /// Failed image request answered with the generated placeholder
  Placeholder,
}

/// A response produced by the router, with metadata about its source.
#[derive(Debug)]
pub struct RoutedResponse {
  pub response: Response,
  pub source: ResponseSource,
  /// Background refresh started for a cache hit. Callers never need to wait
  /// on it; it is exposed so shutdown and tests can.
  pub revalidation: Option<JoinHandle<()>>,
}

impl RoutedResponse {
  pub fn new(response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      revalidation: None,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self::new(response, ResponseSource::Network)
  }

  pub fn from_cache(entry: CacheEntry, revalidation: Option<JoinHandle<()>>) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      revalidation,
    }
  }
}

/// Result of routing one request.
#[derive(Debug)]
pub enum RouteOutcome {
  /// Not ours to handle (cross-origin); the caller fetches it untouched
  Passthrough,
  Respond(RoutedResponse),
}
