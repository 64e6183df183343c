//! Messages exchanged with pages (one JSON object per line in `run` mode).

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::cache::NamespaceStats;

/// Inbound message from a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Activate an installed, waiting version now
  SkipWaiting,
  /// Ask for the entry count of every cache
  GetCacheStats,
  /// Ask for the offline queue to be replayed
  BackgroundSync,
}

/// Reply sent back to the client that asked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
  CacheStats(Vec<NamespaceStats>),
}

pub fn parse_message(line: &str) -> Result<WorkerMessage> {
  serde_json::from_str(line.trim()).map_err(|e| eyre!("Invalid message {:?}: {}", line.trim(), e))
}
