//! Offline action queue.
//!
//! Actions attempted while offline (or that failed online) are queued,
//! persisted, and replayed in order once connectivity returns.

mod action;
mod queue;

pub use action::{send_action, ActionKind, QueuedAction};
pub use queue::{DrainReport, OfflineQueue};
