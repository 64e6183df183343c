//! Versioned response caches for offline support.
//!
//! This module provides the app-shell caching layer:
//! - A static cache filled once per version from a fixed manifest
//! - A dynamic cache filled opportunistically from live traffic
//! - Strategy routing per request (network-first for pages, cache-first
//!   with background refresh for everything else)
//! - Pruning of stale versions on activation

mod lifecycle;
mod router;
mod storage;
mod traits;

pub use lifecycle::{Lifecycle, WorkerState};
pub use router::Router;
pub use storage::SqliteStore;
pub use traits::{CacheStore, NamespaceStats, RouteOutcome};
#[cfg(test)]
pub use traits::ResponseSource;
