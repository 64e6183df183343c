use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::local::LocalStore;
use crate::net::Fetch;

use super::action::{send_action, ActionKind, QueuedAction};

/// Storage key holding the JSON array of queued actions
pub const QUEUE_STORAGE_KEY: &str = "syncQueue";

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
}

/// FIFO queue of actions waiting for connectivity.
///
/// The in-memory queue is authoritative; every change is persisted in full
/// on a best-effort basis. Replays carry no deduplication: an action whose
/// replay succeeded but whose removal was never persisted is sent again.
pub struct OfflineQueue {
  store: Arc<dyn LocalStore>,
  items: Mutex<Vec<QueuedAction>>,
  /// Serialises drain passes
  drain_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn LocalStore>) -> Self {
    Self {
      store,
      items: Mutex::new(Vec::new()),
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  fn items(&self) -> MutexGuard<'_, Vec<QueuedAction>> {
    self.items.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Replace the in-memory queue with the persisted one.
  /// Unreadable or corrupt data loads as an empty queue.
  pub fn load(&self) -> usize {
    let loaded = match self.store.get_item(QUEUE_STORAGE_KEY) {
      Ok(Some(raw)) => serde_json::from_str::<Vec<QueuedAction>>(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Dropping corrupt sync queue");
        Vec::new()
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(error = %e, "Could not load sync queue");
        Vec::new()
      }
    };

    let count = loaded.len();
    *self.items() = loaded;
    debug!(count, "Loaded sync queue");
    count
  }

  /// Append an action and persist the queue.
  pub fn enqueue(&self, action: ActionKind, payload: Value) -> QueuedAction {
    let item = QueuedAction::new(action, payload);
    let mut items = self.items();
    items.push(item.clone());
    self.persist(&items);
    info!(id = %item.id, action = %action, queued = items.len(), "Queued action for sync");
    item
  }

  pub fn len(&self) -> usize {
    self.items().len()
  }

  pub fn is_empty(&self) -> bool {
    self.items().is_empty()
  }

  /// Copy of the queue in enqueue order
  pub fn snapshot(&self) -> Vec<QueuedAction> {
    self.items().clone()
  }

  fn persist(&self, items: &[QueuedAction]) {
    let result = serde_json::to_string(items)
      .map_err(|e| e.to_string())
      .and_then(|raw| {
        self
          .store
          .set_item(QUEUE_STORAGE_KEY, &raw)
          .map_err(|e| e.to_string())
      });

    if let Err(e) = result {
      warn!(error = %e, "Could not persist sync queue");
    }
  }

  fn remove(&self, id: &str) {
    let mut items = self.items();
    items.retain(|item| item.id != id);
    self.persist(&items);
  }

  /// Replay every queued action once, oldest first, one at a time.
  ///
  /// A failed replay leaves its action queued for the next drain; it never
  /// stops the pass. Actions enqueued while the pass runs are kept.
  pub async fn drain<F: Fetch + ?Sized>(&self, fetcher: &F, origin: &Url) -> DrainReport {
    let _pass = self.drain_lock.lock().await;
    let pending = self.snapshot();
    let mut report = DrainReport::default();

    for item in pending {
      report.attempted += 1;
      match send_action(fetcher, origin, item.action, &item.payload).await {
        Ok(_) => {
          self.remove(&item.id);
          report.succeeded += 1;
        }
        Err(e) => {
          warn!(id = %item.id, action = %item.action, error = %e, "Sync failed");
          report.failed += 1;
        }
      }
    }

    info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      failed = report.failed,
      "Drain finished"
    );
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::local::{SqliteLocalStore, StorageError};
  use crate::net::{FetchError, Request, Response};
  use crate::test_support::{origin, ScriptedFetcher};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, Ordering};

  fn sqlite_store() -> Arc<SqliteLocalStore> {
    Arc::new(SqliteLocalStore::new(&Database::open_in_memory().unwrap(), None))
  }

  fn persisted(store: &SqliteLocalStore) -> Vec<QueuedAction> {
    serde_json::from_str(&store.get_item(QUEUE_STORAGE_KEY).unwrap().unwrap()).unwrap()
  }

  #[test]
  fn test_enqueue_persists_immediately() {
    let store = sqlite_store();
    let queue = OfflineQueue::new(store.clone());

    let first = queue.enqueue(ActionKind::LikePost, json!({ "postId": 7 }));
    let second = queue.enqueue(ActionKind::PostComment, json!({ "text": "hi" }));

    let saved = persisted(&store);
    assert_eq!(saved, vec![first, second]);
  }

  #[test]
  fn test_load_restores_queue() {
    let store = sqlite_store();
    OfflineQueue::new(store.clone()).enqueue(ActionKind::SaveProgress, json!({ "lesson": 2 }));

    let queue = OfflineQueue::new(store);
    assert_eq!(queue.load(), 1);
    assert_eq!(queue.snapshot()[0].action, ActionKind::SaveProgress);
  }

  #[test]
  fn test_corrupt_persisted_queue_loads_empty() {
    let store = sqlite_store();
    store.set_item(QUEUE_STORAGE_KEY, "[{broken").unwrap();

    let queue = OfflineQueue::new(store);
    assert_eq!(queue.load(), 0);
    assert!(queue.is_empty());
  }

  #[test]
  fn test_persist_failure_keeps_memory_queue() {
    struct ReadOnly;
    impl LocalStore for ReadOnly {
      fn get_item(&self, _: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
      }
      fn set_item(&self, _: &str, _: &str) -> Result<(), StorageError> {
        Err(StorageError::LockPoisoned)
      }
      fn remove_item(&self, _: &str) -> Result<(), StorageError> {
        Ok(())
      }
      fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
      }
    }

    let queue = OfflineQueue::new(Arc::new(ReadOnly));
    queue.enqueue(ActionKind::LikePost, json!({}));
    assert_eq!(queue.len(), 1);
  }

  #[tokio::test]
  async fn test_drain_all_success_empties_queue() {
    let store = sqlite_store();
    let queue = OfflineQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    fetcher
      .respond("/api/likes", 200, "{}")
      .respond("/api/comments", 201, "{}")
      .respond("/api/progress", 200, "");

    queue.enqueue(ActionKind::LikePost, json!({ "postId": 1 }));
    queue.enqueue(ActionKind::PostComment, json!({ "text": "a" }));
    queue.enqueue(ActionKind::SaveProgress, json!({ "lesson": 1 }));

    let report = queue.drain(&fetcher, &origin()).await;
    assert_eq!(
      report,
      DrainReport {
        attempted: 3,
        succeeded: 3,
        failed: 0
      }
    );
    assert!(queue.is_empty());
    assert!(persisted(&store).is_empty());
    assert_eq!(
      fetcher.calls(),
      vec![
        "POST https://quiter.test/api/likes",
        "POST https://quiter.test/api/comments",
        "POST https://quiter.test/api/progress",
      ]
    );
  }

  #[tokio::test]
  async fn test_drain_keeps_failed_items_in_order() {
    let store = sqlite_store();
    let queue = OfflineQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    fetcher
      .respond("/api/likes", 200, "{}")
      .fail("/api/comments")
      .respond("/api/progress", 503, "");

    let c1 = queue.enqueue(ActionKind::PostComment, json!({ "text": "1" }));
    queue.enqueue(ActionKind::LikePost, json!({ "postId": 1 }));
    let p1 = queue.enqueue(ActionKind::SaveProgress, json!({ "lesson": 1 }));
    queue.enqueue(ActionKind::LikePost, json!({ "postId": 2 }));
    let c2 = queue.enqueue(ActionKind::PostComment, json!({ "text": "2" }));

    let report = queue.drain(&fetcher, &origin()).await;
    assert_eq!(report.attempted, 5);
    assert_eq!(report.failed, 3);

    let expected = vec![c1, p1, c2];
    assert_eq!(queue.snapshot(), expected);
    assert_eq!(persisted(&store), expected);
  }

  #[tokio::test]
  async fn test_failed_items_retried_on_next_drain() {
    let queue = OfflineQueue::new(sqlite_store());
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("/api/likes", 200, "{}");
    fetcher.set_online(false);

    queue.enqueue(ActionKind::LikePost, json!({ "postId": 7 }));
    assert_eq!(queue.drain(&fetcher, &origin()).await.failed, 1);
    assert_eq!(queue.len(), 1);

    fetcher.set_online(true);
    assert_eq!(queue.drain(&fetcher, &origin()).await.succeeded, 1);
    assert!(queue.is_empty());
    assert_eq!(fetcher.call_count(), 2);
  }

  #[tokio::test]
  async fn test_empty_drain_does_no_io() {
    let queue = OfflineQueue::new(sqlite_store());
    let fetcher = ScriptedFetcher::new();
    assert_eq!(queue.drain(&fetcher, &origin()).await, DrainReport::default());
    assert_eq!(fetcher.call_count(), 0);
  }

  /// Fetcher that queues one more action from inside the first replay
  struct EnqueueDuringFetch {
    queue: Arc<OfflineQueue>,
    enqueued: AtomicBool,
  }

  #[async_trait]
  impl Fetch for EnqueueDuringFetch {
    async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
      if !self.enqueued.swap(true, Ordering::SeqCst) {
        self.queue.enqueue(ActionKind::SaveProgress, json!({ "lesson": 9 }));
      }
      Ok(Response::new(200))
    }
  }

  #[tokio::test]
  async fn test_items_enqueued_mid_drain_are_kept() {
    let store = sqlite_store();
    let queue = Arc::new(OfflineQueue::new(store.clone()));
    queue.enqueue(ActionKind::LikePost, json!({ "postId": 1 }));
    queue.enqueue(ActionKind::PostComment, json!({ "text": "a" }));

    let fetcher = EnqueueDuringFetch {
      queue: queue.clone(),
      enqueued: AtomicBool::new(false),
    };
    let report = queue.drain(&fetcher, &origin()).await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);
    let left = queue.snapshot();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].action, ActionKind::SaveProgress);
    assert_eq!(persisted(&store), left);
  }
}
