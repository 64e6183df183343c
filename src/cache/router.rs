//! Per-request strategy selection between the caches and the network.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::net::{Fetch, FetchError, Method, Request, RequestDestination, RequestMode, Response};

use super::lifecycle::CacheVersion;
use super::traits::{CacheEntry, CacheStore, ResponseSource, RouteOutcome, RoutedResponse};

/// Served for failed image requests.
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#f0f0f0"/><text x="100" y="100" text-anchor="middle" dy=".3em" fill="#999">Image failed to load</text></svg>"##;

/// Served for offline navigations when not even the app shell is cached.
pub const OFFLINE_SHELL_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Offline</title></head>
<body><h1>You are offline</h1><p>This page will load once the connection is back.</p></body>
</html>
"#;

/// Routes same-origin requests through the caches.
///
/// * navigations: network first, then the cached page, then the app shell
/// * everything else: cache first with a background refresh
///   (stale-while-revalidate), images fall back to a placeholder
#[derive(Clone)]
pub struct Router {
  store: Arc<dyn CacheStore>,
  fetcher: Arc<dyn Fetch>,
  origin: Url,
  dynamic_cache: String,
  app_shell_key: String,
}

impl Router {
  pub fn new(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetch>,
    origin: Url,
    version: &CacheVersion,
    app_shell: Url,
  ) -> Self {
    Self {
      store,
      fetcher,
      origin,
      dynamic_cache: version.dynamic_name(),
      app_shell_key: Request::get(app_shell).cache_key(),
    }
  }

  /// Route one request. Network failures only surface when no fallback applies.
  pub async fn handle(&self, request: Request) -> Result<RouteOutcome, FetchError> {
    if !request.is_same_origin(&self.origin) {
      return Ok(RouteOutcome::Passthrough);
    }

    let request_method = request.method;
    let routed = if request.method != Method::Get {
      // Only GET responses are cacheable
      RoutedResponse::from_network(self.fetcher.fetch(&request).await?)
    } else if request.mode == RequestMode::Navigate {
      self.network_first(&request).await?
    } else {
      self.cache_first(request).await?
    };

    debug!(
      method = request_method.as_str(),
      source = ?routed.source,
      status = routed.response.status,
      "Routed request"
    );
    Ok(RouteOutcome::Respond(routed))
  }

  async fn network_first(&self, request: &Request) -> Result<RoutedResponse, FetchError> {
    let error = match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store_dynamic(request.cache_key(), &response);
        }
        return Ok(RoutedResponse::from_network(response));
      }
      Err(e) => e,
    };

    debug!(error = %error, "Navigation failed, trying caches");
    if let Some(entry) = self.lookup(&request.cache_key()) {
      return Ok(RoutedResponse::from_cache(entry, None));
    }
    if let Some(entry) = self.lookup(&self.app_shell_key) {
      return Ok(RoutedResponse::new(entry.response, ResponseSource::AppShell));
    }

    Ok(RoutedResponse::new(
      Response::new(503)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_body(OFFLINE_SHELL_HTML),
      ResponseSource::OfflineShell,
    ))
  }

  async fn cache_first(&self, request: Request) -> Result<RoutedResponse, FetchError> {
    let key = request.cache_key();

    if let Some(entry) = self.lookup(&key) {
      let refresh = self.spawn_revalidation(request, key);
      return Ok(RoutedResponse::from_cache(entry, Some(refresh)));
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.ok() {
          self.store_dynamic(key, &response);
        }
        Ok(RoutedResponse::from_network(response))
      }
      Err(e) if request.destination == RequestDestination::Image => {
        debug!(error = %e, "Image request failed, serving placeholder");
        Ok(RoutedResponse::new(
          Response::new(200)
            .with_header("Content-Type", "image/svg+xml")
            .with_body(PLACEHOLDER_SVG),
          ResponseSource::Placeholder,
        ))
      }
      Err(e) => {
        warn!(error = %e, "Network request failed");
        Err(e)
      }
    }
  }

  /// Refresh a cached entry in the background; the outcome never reaches
  /// the caller that already got the cached copy.
  fn spawn_revalidation(&self, request: Request, key: String) -> tokio::task::JoinHandle<()> {
    let router = self.clone();
    tokio::spawn(async move {
      match router.fetcher.fetch(&request).await {
        Ok(response) if response.ok() => router.store_dynamic(key, &response),
        Ok(response) => debug!(status = response.status, key = %key, "Refresh not cached"),
        Err(e) => debug!(error = %e, key = %key, "Background refresh failed"),
      }
    })
  }

  fn lookup(&self, key: &str) -> Option<CacheEntry> {
    match self.store.match_any(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, key = %key, "Cache lookup failed, treating as miss");
        None
      }
    }
  }

  fn store_dynamic(&self, key: String, response: &Response) {
    let entry = CacheEntry::new(key, response.clone());
    if let Err(e) = self.store.put(&self.dynamic_cache, &entry) {
      warn!(error = %e, key = %entry.request_key, "Failed to cache response");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStore;
  use crate::db::Database;
  use crate::test_support::{origin, url, ScriptedFetcher};

  struct Fixture {
    store: Arc<SqliteStore>,
    fetcher: Arc<ScriptedFetcher>,
    router: Router,
  }

  const DYNAMIC: &str = "quiter-dynamic-v1";
  const STATIC: &str = "quiter-static-v1";

  fn fixture() -> Fixture {
    let store = Arc::new(SqliteStore::new(&Database::open_in_memory().unwrap()));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let router = Router::new(
      store.clone(),
      fetcher.clone(),
      origin(),
      &CacheVersion::new("quiter", "v1"),
      url("/index.html"),
    );
    Fixture {
      store,
      fetcher,
      router,
    }
  }

  fn cache(store: &SqliteStore, namespace: &str, path: &str, body: &str) {
    let entry = CacheEntry::new(
      url(path).to_string(),
      Response::new(200).with_body(body),
    );
    store.put(namespace, &entry).unwrap();
  }

  async fn respond(router: &Router, request: Request) -> RoutedResponse {
    match router.handle(request).await.unwrap() {
      RouteOutcome::Respond(routed) => routed,
      RouteOutcome::Passthrough => panic!("expected a response"),
    }
  }

  #[tokio::test]
  async fn test_cross_origin_passes_through() {
    let fx = fixture();
    let request = Request::get(Url::parse("https://cdn.other.test/lib.js").unwrap());
    let outcome = fx.router.handle(request).await.unwrap();
    assert!(matches!(outcome, RouteOutcome::Passthrough));
    assert_eq!(fx.fetcher.call_count(), 0);
  }

  #[tokio::test]
  async fn test_navigation_online_returns_and_caches_network() {
    let fx = fixture();
    fx.fetcher.respond("/learning.html", 200, "fresh");
    cache(&fx.store, DYNAMIC, "/learning.html", "stale");

    let routed = respond(&fx.router, Request::navigate(url("/learning.html"))).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body, b"fresh");

    let cached = fx
      .store
      .lookup(DYNAMIC, url("/learning.html").as_str())
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.body, b"fresh");
  }

  #[tokio::test]
  async fn test_navigation_error_status_is_returned_but_not_cached() {
    let fx = fixture();
    fx.fetcher.respond("/community.html", 500, "boom");

    let routed = respond(&fx.router, Request::navigate(url("/community.html"))).await;
    assert_eq!(routed.response.status, 500);
    assert!(fx
      .store
      .lookup(DYNAMIC, url("/community.html").as_str())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_navigation_offline_uses_cached_page() {
    let fx = fixture();
    fx.fetcher.set_online(false);
    cache(&fx.store, DYNAMIC, "/learning.html", "cached page");
    cache(&fx.store, STATIC, "/index.html", "shell");

    let routed = respond(&fx.router, Request::navigate(url("/learning.html"))).await;
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.body, b"cached page");
  }

  #[tokio::test]
  async fn test_navigation_offline_falls_back_to_app_shell() {
    let fx = fixture();
    fx.fetcher.set_online(false);
    cache(&fx.store, STATIC, "/index.html", "shell");

    let routed = respond(&fx.router, Request::navigate(url("/profile.html"))).await;
    assert_eq!(routed.source, ResponseSource::AppShell);
    assert_eq!(routed.response.body, b"shell");
  }

  #[tokio::test]
  async fn test_navigation_offline_without_shell_generates_one() {
    let fx = fixture();
    fx.fetcher.set_online(false);

    let routed = respond(&fx.router, Request::navigate(url("/"))).await;
    assert_eq!(routed.source, ResponseSource::OfflineShell);
    assert_eq!(routed.response.status, 503);
    assert!(routed.response.content_type().unwrap().starts_with("text/html"));
  }

  #[tokio::test]
  async fn test_asset_hit_serves_cache_and_revalidates() {
    let fx = fixture();
    cache(&fx.store, STATIC, "/css/styles.css", "old");
    fx.fetcher.respond("/css/styles.css", 200, "new");

    let request = Request::get(url("/css/styles.css")).with_destination(RequestDestination::Style);
    let routed = respond(&fx.router, request).await;
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.body, b"old");

    routed.revalidation.unwrap().await.unwrap();
    let refreshed = fx
      .store
      .lookup(DYNAMIC, url("/css/styles.css").as_str())
      .unwrap()
      .unwrap();
    assert_eq!(refreshed.response.body, b"new");
  }

  #[tokio::test]
  async fn test_asset_hit_offline_still_served() {
    let fx = fixture();
    cache(&fx.store, DYNAMIC, "/js/utils.js", "cached");
    fx.fetcher.set_online(false);

    let routed = respond(&fx.router, Request::get(url("/js/utils.js"))).await;
    assert_eq!(routed.response.body, b"cached");
    routed.revalidation.unwrap().await.unwrap();

    let still = fx
      .store
      .lookup(DYNAMIC, url("/js/utils.js").as_str())
      .unwrap()
      .unwrap();
    assert_eq!(still.response.body, b"cached");
  }

  #[tokio::test]
  async fn test_asset_miss_fetches_and_caches() {
    let fx = fixture();
    fx.fetcher.respond("/js/search.js", 200, "search");

    let routed = respond(&fx.router, Request::get(url("/js/search.js"))).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert!(routed.revalidation.is_none());
    assert!(fx
      .store
      .lookup(DYNAMIC, url("/js/search.js").as_str())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_asset_miss_404_not_cached() {
    let fx = fixture();
    let routed = respond(&fx.router, Request::get(url("/nope.js"))).await;
    assert_eq!(routed.response.status, 404);
    assert!(fx.store.keys(DYNAMIC).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_image_miss_offline_gets_placeholder() {
    let fx = fixture();
    fx.fetcher.set_online(false);

    let request = Request::get(url("/img/avatar.png")).with_destination(RequestDestination::Image);
    let routed = respond(&fx.router, request).await;
    assert_eq!(routed.source, ResponseSource::Placeholder);
    assert_eq!(routed.response.content_type(), Some("image/svg+xml"));
  }

  #[tokio::test]
  async fn test_script_miss_offline_propagates_error() {
    let fx = fixture();
    fx.fetcher.set_online(false);

    let err = fx
      .router
      .handle(Request::get(url("/js/darkmode.js")))
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }));
  }

  #[tokio::test]
  async fn test_post_is_never_cached() {
    let fx = fixture();
    fx.fetcher.respond("/api/likes", 200, "{}");

    let request = Request::post_json(url("/api/likes"), &serde_json::json!({ "postId": 1 }));
    let routed = respond(&fx.router, request).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert!(fx.store.names().unwrap().is_empty());
  }
}
