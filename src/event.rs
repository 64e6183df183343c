use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::messages::{parse_message, WorkerMessage};
use crate::net::{Fetch, Method, Request};

/// Connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// Application events
#[derive(Debug)]
pub enum Event {
  /// The origin became reachable or unreachable
  Connectivity(Connectivity),
  /// Periodic sweep of expired TTL cache items
  SweepTick,
  /// Deferred drain scheduled at startup
  StartupDrain,
  /// Message from a client
  Message(WorkerMessage),
  /// Input closed or interrupt received
  Shutdown,
}

/// Tracks whether the origin is reachable by probing it.
///
/// Any HTTP answer counts as online; only a failed request counts as offline.
pub struct ConnectivityMonitor {
  fetcher: Arc<dyn Fetch>,
  probe_url: Url,
  online: AtomicBool,
}

impl ConnectivityMonitor {
  pub fn new(fetcher: Arc<dyn Fetch>, probe_url: Url) -> Self {
    Self {
      fetcher,
      probe_url,
      online: AtomicBool::new(false),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Record a new state; returns the transition if the state changed.
  pub fn set_online(&self, online: bool) -> Option<Connectivity> {
    let was = self.online.swap(online, Ordering::SeqCst);
    match (was, online) {
      (false, true) => Some(Connectivity::Online),
      (true, false) => Some(Connectivity::Offline),
      _ => None,
    }
  }

  pub async fn probe(&self) -> bool {
    let request = Request::get(self.probe_url.clone()).with_method(Method::Head);
    match self.fetcher.fetch(&request).await {
      Ok(_) => true,
      Err(e) => {
        debug!(error = %e, "Connectivity probe failed");
        false
      }
    }
  }

  /// Probe once and report a transition, if any.
  pub async fn check(&self) -> Option<Connectivity> {
    let online = self.probe().await;
    self.set_online(online)
  }
}

/// Event handler multiplexing connectivity changes, timers and client
/// messages onto one channel
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Probe connectivity every `interval`, emitting transitions only
  pub fn watch_connectivity(&self, monitor: Arc<ConnectivityMonitor>, interval: Duration) {
    let tx = self.sender();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // First tick completes immediately; startup already probed
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if let Some(change) = monitor.check().await {
          if tx.send(Event::Connectivity(change)).is_err() {
            break;
          }
        }
      }
    });
  }

  /// Emit `Event::SweepTick` every `interval`
  pub fn tick_every(&self, interval: Duration) {
    let tx = self.sender();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if tx.send(Event::SweepTick).is_err() {
          break;
        }
      }
    });
  }

  /// Emit `event` once after `delay`
  pub fn schedule(&self, delay: Duration, event: Event) {
    let tx = self.sender();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = tx.send(event);
    });
  }

  /// Read client messages from stdin, one JSON object per line.
  /// EOF or Ctrl-C emits `Event::Shutdown`.
  pub fn read_messages(&self) {
    let tx = self.sender();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => continue,
          Ok(Some(line)) => match parse_message(&line) {
            Ok(message) => {
              if tx.send(Event::Message(message)).is_err() {
                break;
              }
            }
            Err(e) => warn!(error = %e, "Ignoring message"),
          },
          Ok(None) | Err(_) => {
            let _ = tx.send(Event::Shutdown);
            break;
          }
        }
      }
    });

    let tx = self.sender();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{url, ScriptedFetcher};

  #[tokio::test]
  async fn test_check_reports_transitions_only() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let monitor = ConnectivityMonitor::new(fetcher.clone(), url("/"));

    assert_eq!(monitor.check().await, Some(Connectivity::Online));
    assert_eq!(monitor.check().await, None);

    fetcher.set_online(false);
    assert_eq!(monitor.check().await, Some(Connectivity::Offline));
    assert!(!monitor.is_online());
    assert_eq!(monitor.check().await, None);

    fetcher.set_online(true);
    assert_eq!(monitor.check().await, Some(Connectivity::Online));
  }

  #[tokio::test]
  async fn test_probe_uses_head() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let monitor = ConnectivityMonitor::new(fetcher.clone(), url("/"));
    assert!(monitor.probe().await);
    assert_eq!(fetcher.calls(), vec!["HEAD https://quiter.test/"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_schedule_fires_after_delay() {
    let mut events = EventHandler::new();
    events.schedule(Duration::from_millis(2000), Event::StartupDrain);
    assert!(matches!(events.next().await, Some(Event::StartupDrain)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_watch_emits_offline_transition() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let monitor = Arc::new(ConnectivityMonitor::new(fetcher.clone(), url("/")));
    monitor.set_online(true);
    fetcher.set_online(false);

    let mut events = EventHandler::new();
    events.watch_connectivity(monitor, Duration::from_secs(15));
    assert!(matches!(
      events.next().await,
      Some(Event::Connectivity(Connectivity::Offline))
    ));
  }
}
