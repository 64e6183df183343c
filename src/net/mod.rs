//! Network access for the offline layer.
//!
//! Everything that would go through `fetch()` in the browser goes through the
//! [`Fetch`] trait, so the router, the lifecycle and the sync queue can be
//! driven by a scripted fetcher in tests.

mod client;
mod types;

pub use client::{Fetch, FetchError, HttpFetcher};
pub use types::{Method, Request, RequestDestination, RequestMode, Response};
