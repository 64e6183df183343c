use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::cache::{
  CacheStore, Lifecycle, NamespaceStats, RouteOutcome, Router, SqliteStore, WorkerState,
};
use crate::config::Config;
use crate::db::Database;
use crate::event::{Connectivity, ConnectivityMonitor, Event, EventHandler};
use crate::local::{LocalStore, SqliteLocalStore, StoreUsage, TtlCache};
use crate::messages::{WorkerMessage, WorkerReply};
use crate::net::{Fetch, FetchError, HttpFetcher, Request};
use crate::status::{StatusBanner, StatusLevel};
use crate::sync::{send_action, ActionKind, DrainReport, OfflineQueue, QueuedAction};

/// Result of a user action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
  /// Sent to the server; carries its JSON answer
  Completed(Value),
  /// Offline; saved for the next drain
  QueuedOffline(QueuedAction),
}

/// Offline-side storage figures
#[derive(Debug, Clone, Serialize)]
pub struct OfflineStats {
  pub local_storage: StoreUsage,
  pub memory: StoreUsage,
  pub sync_queue: usize,
  pub is_online: bool,
  /// Banner still on screen, if any
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
}

/// Application context: every component, wired from one `Config`
pub struct App {
  config: Config,
  fetcher: Arc<dyn Fetch>,
  lifecycle: Lifecycle,
  router: Router,
  queue: OfflineQueue,
  ttl: TtlCache,
  banner: StatusBanner,
  connectivity: Arc<ConnectivityMonitor>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(config.storage.path.as_deref())?;
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    Self::with_parts(config, &db, fetcher, true)
  }

  /// Build from an opened database and any fetcher.
  /// `echo_status` prints banners to stderr in addition to logging them.
  pub fn with_parts(
    config: Config,
    db: &Database,
    fetcher: Arc<dyn Fetch>,
    echo_status: bool,
  ) -> Result<Self> {
    let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::new(db));
    let local: Arc<dyn LocalStore> =
      Arc::new(SqliteLocalStore::new(db, config.local_cache.quota_bytes));

    let lifecycle = Lifecycle::new(
      store.clone(),
      fetcher.clone(),
      config.origin.clone(),
      &config.cache,
    );
    let router = Router::new(
      store,
      fetcher.clone(),
      config.origin.clone(),
      lifecycle.version(),
      config.resolve(&config.cache.app_shell)?,
    );

    let queue = OfflineQueue::new(local.clone());
    queue.load();

    let ttl = TtlCache::new(local, &config.local_cache);
    let banner = StatusBanner::new(Duration::from_secs(config.status.banner_secs), echo_status);
    let connectivity = Arc::new(ConnectivityMonitor::new(
      fetcher.clone(),
      config.resolve(&config.network.probe_path)?,
    ));

    Ok(Self {
      config,
      fetcher,
      lifecycle,
      router,
      queue,
      ttl,
      banner,
      connectivity,
    })
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub fn ttl(&self) -> &TtlCache {
    &self.ttl
  }

  #[cfg(test)]
  pub fn banner(&self) -> &StatusBanner {
    &self.banner
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Probe the origin once and record the result
  pub async fn refresh_connectivity(&self) -> bool {
    self.connectivity.check().await;
    self.connectivity.is_online()
  }

  pub async fn install(&self) -> Result<usize> {
    self.lifecycle.install().await
  }

  pub fn activate(&self) -> Result<Vec<String>> {
    self.lifecycle.activate()
  }

  pub async fn route(&self, request: Request) -> Result<RouteOutcome, FetchError> {
    self.router.handle(request).await
  }

  pub fn cache_stats(&self) -> Result<Vec<NamespaceStats>> {
    self.lifecycle.cache_stats()
  }

  pub fn offline_stats(&self) -> OfflineStats {
    let ttl = self.ttl.stats();
    OfflineStats {
      local_storage: ttl.persistent,
      memory: ttl.memory,
      sync_queue: self.queue.len(),
      is_online: self.is_online(),
      status: self.banner.current().map(|(message, _)| message),
    }
  }

  /// Run a user action now when online, otherwise queue it.
  ///
  /// An online attempt that fails is queued as well, and the error returned.
  pub async fn handle_action(&self, kind: ActionKind, payload: Value) -> Result<ActionOutcome> {
    if !self.is_online() {
      let item = self.queue.enqueue(kind, payload);
      self.banner.show(
        "Action saved, it will sync when the connection is back",
        StatusLevel::Info,
      );
      return Ok(ActionOutcome::QueuedOffline(item));
    }

    match send_action(self.fetcher.as_ref(), &self.config.origin, kind, &payload).await {
      Ok(answer) => Ok(ActionOutcome::Completed(answer)),
      Err(e) => {
        self.queue.enqueue(kind, payload);
        Err(eyre!("{} failed and was queued for sync: {}", kind, e))
      }
    }
  }

  /// Replay the offline queue. Does nothing while offline or when empty.
  pub async fn drain(&self) -> DrainReport {
    if !self.is_online() || self.queue.is_empty() {
      return DrainReport::default();
    }

    self.banner.show("Syncing offline data...", StatusLevel::Info);
    let report = self.queue.drain(self.fetcher.as_ref(), &self.config.origin).await;

    if report.failed == 0 {
      self.banner.show("Offline data synced", StatusLevel::Success);
    } else {
      self.banner.show(
        format!("{} items failed to sync", report.failed),
        StatusLevel::Warning,
      );
    }
    report
  }

  pub async fn handle_message(&self, message: WorkerMessage) -> Result<Option<WorkerReply>> {
    match message {
      WorkerMessage::SkipWaiting => {
        self.lifecycle.skip_waiting()?;
        Ok(None)
      }
      WorkerMessage::GetCacheStats => Ok(Some(WorkerReply::CacheStats(self.cache_stats()?))),
      WorkerMessage::BackgroundSync => {
        self.drain().await;
        Ok(None)
      }
    }
  }

  /// Startup: probe, announce, install the current version and schedule the
  /// first drain when there is something to send.
  async fn start(&self, events: &EventHandler) {
    let online = self.refresh_connectivity().await;
    if online {
      self.banner.show("Connected", StatusLevel::Success);
      match self.install().await {
        Ok(count) => info!(count, "Install complete"),
        Err(e) => error!(error = %e, "Install failed, keeping the previous version"),
      }
    } else {
      self.banner.show("Offline mode", StatusLevel::Warning);
    }

    if online && !self.queue.is_empty() {
      events.schedule(
        Duration::from_millis(self.config.sync.startup_drain_delay_ms),
        Event::StartupDrain,
      );
    }
  }

  /// Handle one event. Returns `false` when the loop should stop.
  pub async fn handle_event(&self, event: Event) -> bool {
    match event {
      Event::Connectivity(change) => {
        self.connectivity.set_online(change == Connectivity::Online);
        match change {
          Connectivity::Online => {
            self.banner.show("Connected", StatusLevel::Success);
            // Sessions that started offline never installed
            if matches!(
              self.lifecycle.state(),
              WorkerState::Parsed | WorkerState::Redundant
            ) {
              if let Err(e) = self.install().await {
                error!(error = %e, "Install failed, keeping the previous version");
              }
            }
            self.drain().await;
          }
          Connectivity::Offline => {
            self
              .banner
              .show("Connection lost, running offline", StatusLevel::Warning);
          }
        }
      }
      Event::SweepTick => {
        self.ttl.sweep_expired();
      }
      Event::StartupDrain => {
        self.drain().await;
      }
      Event::Message(message) => match self.handle_message(message).await {
        Ok(Some(reply)) => match serde_json::to_string(&reply) {
          Ok(line) => println!("{}", line),
          Err(e) => warn!(error = %e, "Could not encode reply"),
        },
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Message failed"),
      },
      Event::Shutdown => {
        info!("Shutting down");
        return false;
      }
    }
    true
  }

  /// Long-running mode: connectivity watch, periodic sweep and client
  /// messages on stdin until EOF or Ctrl-C.
  pub async fn run(&self) -> Result<()> {
    let mut events = EventHandler::new();
    self.start(&events).await;

    events.watch_connectivity(
      self.connectivity.clone(),
      Duration::from_secs(self.config.network.probe_interval_secs),
    );
    events.tick_every(Duration::from_secs(self.config.local_cache.sweep_interval_secs));
    events.read_messages();

    while let Some(event) = events.next().await {
      if !self.handle_event(event).await {
        break;
      }
    }
    Ok(())
  }
}
