//! Install / activate lifecycle of the versioned caches.

use std::sync::{Arc, Mutex, PoisonError};

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{error, info, warn};
use url::Url;

use crate::config::CacheConfig;
use crate::net::{Fetch, FetchError, Request};

use super::traits::{CacheEntry, CacheStore, NamespaceStats};

/// Versioned names of the static and dynamic caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersion {
  prefix: String,
  version: String,
}

impl CacheVersion {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(&config.prefix, &config.version)
  }

  pub fn static_name(&self) -> String {
    format!("{}-static-{}", self.prefix, self.version)
  }

  pub fn dynamic_name(&self) -> String {
    format!("{}-dynamic-{}", self.prefix, self.version)
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name() || name == self.dynamic_name()
  }
}

/// Worker states, in lifecycle order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
  #[default]
  Parsed,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  /// Active and controlling clients
  Activated,
  /// Install failed; this version will never activate
  Redundant,
}

/// Drives install, activation and skip-waiting for one cache version.
pub struct Lifecycle {
  store: Arc<dyn CacheStore>,
  fetcher: Arc<dyn Fetch>,
  origin: Url,
  version: CacheVersion,
  manifest: Vec<String>,
  skip_waiting_on_install: bool,
  state: Mutex<WorkerState>,
}

impl Lifecycle {
  pub fn new(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetch>,
    origin: Url,
    config: &CacheConfig,
  ) -> Self {
    Self {
      store,
      fetcher,
      origin,
      version: CacheVersion::from_config(config),
      manifest: config.manifest.clone(),
      skip_waiting_on_install: config.skip_waiting_on_install,
      state: Mutex::new(WorkerState::Parsed),
    }
  }

  pub fn version(&self) -> &CacheVersion {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  /// Fetch every manifest URL and write them into the static cache in one
  /// batch. Any failed or non-2xx fetch fails the whole install and leaves
  /// the store untouched. Returns the number of cached assets.
  pub async fn install(&self) -> Result<usize> {
    self.set_state(WorkerState::Installing);
    let static_name = self.version.static_name();
    info!(cache = %static_name, assets = self.manifest.len(), "Installing static assets");

    let entries = match self.fetch_manifest().await {
      Ok(entries) => entries,
      Err(e) => {
        error!(error = %e, "Error caching static assets");
        self.set_state(WorkerState::Redundant);
        return Err(eyre!("Install failed: {}", e));
      }
    };

    if let Err(e) = self.store.put_all(&static_name, &entries) {
      error!(error = %e, "Error writing static assets");
      self.set_state(WorkerState::Redundant);
      return Err(e);
    }

    self.set_state(WorkerState::Installed);
    info!(cache = %static_name, "Static assets cached");

    if self.skip_waiting_on_install {
      self.activate()?;
    }
    Ok(entries.len())
  }

  async fn fetch_manifest(&self) -> Result<Vec<CacheEntry>, FetchError> {
    let requests = self
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(Request::get)
          .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let fetches = requests.iter().map(|request| async move {
      let response = self.fetcher.fetch(request).await?;
      if !response.ok() {
        return Err(FetchError::Status {
          url: request.url.to_string(),
          status: response.status,
        });
      }
      Ok(CacheEntry::new(request.cache_key(), response))
    });

    try_join_all(fetches).await
  }

  /// Delete every cache that does not belong to the current version, then
  /// claim clients. Returns the names that were deleted.
  pub fn activate(&self) -> Result<Vec<String>> {
    let static_name = self.version.static_name();
    let names = self.store.names()?;
    if !names.contains(&static_name) {
      return Err(eyre!(
        "Cannot activate: {} has not been installed",
        static_name
      ));
    }

    self.set_state(WorkerState::Activating);
    info!(version = %static_name, "Activating");

    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| !self.version.is_current(name))
      .collect();
    for name in &stale {
      info!(cache = %name, "Deleting old cache");
    }

    // Prune before claiming so no request sees a half-deleted generation
    if let Err(e) = self.store.delete_namespaces(&stale) {
      self.set_state(WorkerState::Installed);
      return Err(e);
    }
    self.store.open(&self.version.dynamic_name())?;

    self.set_state(WorkerState::Activated);
    info!("Activated");
    Ok(stale)
  }

  /// Activate an installed, waiting version right away.
  /// Returns whether an activation happened.
  pub fn skip_waiting(&self) -> Result<bool> {
    match self.state() {
      WorkerState::Installed => self.activate().map(|_| true),
      state => {
        warn!(?state, "skip waiting ignored: no version is waiting");
        Ok(false)
      }
    }
  }

  /// Entry count of every cache, in creation order.
  pub fn cache_stats(&self) -> Result<Vec<NamespaceStats>> {
    self
      .store
      .names()?
      .into_iter()
      .map(|name| {
        let count = self.store.keys(&name)?.len();
        Ok(NamespaceStats { name, count })
      })
      .collect()
  }
}
