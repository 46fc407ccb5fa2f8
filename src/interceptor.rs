//! Fetch interception: network-first documents, cache-first assets.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::store::{CacheStore, RequestIdentity, StoredResponse};

/// Body of the synthetic offline page served when both network and cache
/// miss for a document request.
pub const OFFLINE_PAGE: &str =
  "<html><body><h1>Offline Mode</h1><p>Content temporarily unavailable</p></body></html>";

/// What an intercepted request is for. Documents (top-level navigations) get
/// network-first treatment, everything else is cache-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Other,
}

impl Destination {
  /// Guess a destination from the file extension, for callers that do not
  /// know the real request context.
  pub fn from_path(path: &str) -> Self {
    let extension = path.rsplit('/').next().and_then(|name| {
      name.contains('.').then(|| name.rsplit('.').next().unwrap_or(""))
    });

    match extension {
      Some("html") | Some("htm") => Self::Document,
      Some("js") => Self::Script,
      Some("css") => Self::Style,
      Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("svg") | Some("webp")
      | Some("ico") => Self::Image,
      Some("woff") | Some("woff2") | Some("ttf") | Some("otf") => Self::Font,
      _ => Self::Other,
    }
  }
}

/// An incoming request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl FetchRequest {
  pub fn get(url: Url, destination: Destination) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination,
    }
  }

  fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  fn identity(&self) -> RequestIdentity {
    RequestIdentity::get(self.url.clone())
  }
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Served from the current generation
  Cache,
  /// Synthetic offline page (document requests only)
  OfflineFallback,
}

/// An intercepted response plus its provenance.
#[derive(Debug)]
pub struct FetchResponse {
  pub response: StoredResponse,
  pub source: ResponseSource,
  /// Opportunistic cache write scheduled for this response. Production
  /// callers return the response without awaiting it; tests may await it
  /// for determinism.
  pub cache_write: Option<JoinHandle<()>>,
}

/// Outcome of interception.
#[derive(Debug)]
pub enum FetchOutcome {
  Intercepted(FetchResponse),
  /// Non-GET requests are never intercepted
  PassThrough,
}

/// Decides the response source per request and opportunistically fills the
/// current generation.
pub struct FetchInterceptor<S> {
  store: Arc<S>,
  generation: String,
}

impl<S: CacheStore + 'static> FetchInterceptor<S> {
  pub fn new(store: Arc<S>, generation: String) -> Self {
    Self { store, generation }
  }

  /// Point the interceptor at a newly activated generation.
  pub fn set_generation(&mut self, generation: String) {
    self.generation = generation;
  }

  /// Handle one intercepted request, with `fetch` as the network path.
  pub async fn handle<F, Fut>(&self, request: &FetchRequest, fetch: F) -> Result<FetchOutcome>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    if !request.is_get() {
      return Ok(FetchOutcome::PassThrough);
    }

    let response = match request.destination {
      Destination::Document => self.network_first(request, fetch).await,
      _ => self.cache_first(request, fetch).await?,
    };

    Ok(FetchOutcome::Intercepted(response))
  }

  /// Documents: try the network, fall back to cache, then to the synthetic
  /// offline page. Never fails from the caller's perspective.
  async fn network_first<F, Fut>(&self, request: &FetchRequest, fetch: F) -> FetchResponse
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let identity = request.identity();

    match fetch().await {
      Ok(response) => {
        let cache_write = response
          .is_success()
          .then(|| self.schedule_write(identity, response.clone()));
        FetchResponse {
          response,
          source: ResponseSource::Network,
          cache_write,
        }
      }
      Err(e) => {
        debug!(target: "fetch", "Network failed for {}: {}; trying cache", request.url, e);

        let cached = match self.store.get(&self.generation, &identity) {
          Ok(cached) => cached,
          Err(e) => {
            warn!(target: "fetch", "Cache lookup for {} failed: {}", request.url, e);
            None
          }
        };

        match cached {
          Some(response) => FetchResponse {
            response,
            source: ResponseSource::Cache,
            cache_write: None,
          },
          None => FetchResponse {
            response: offline_response(),
            source: ResponseSource::OfflineFallback,
            cache_write: None,
          },
        }
      }
    }
  }

  /// Static assets: serve from cache without touching the network; on a
  /// miss, fetch and opportunistically cache. Network errors propagate.
  async fn cache_first<F, Fut>(&self, request: &FetchRequest, fetch: F) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let identity = request.identity();

    let cached = match self.store.get(&self.generation, &identity) {
      Ok(cached) => cached,
      Err(e) => {
        // A broken cache read degrades to a miss, not a failed request.
        warn!(target: "fetch", "Cache lookup for {} failed: {}", request.url, e);
        None
      }
    };

    if let Some(response) = cached {
      return Ok(FetchResponse {
        response,
        source: ResponseSource::Cache,
        cache_write: None,
      });
    }

    let response = fetch().await?;
    let cache_write = response
      .is_success()
      .then(|| self.schedule_write(identity, response.clone()));

    Ok(FetchResponse {
      response,
      source: ResponseSource::Network,
      cache_write,
    })
  }

  /// Schedule a fire-and-forget write into the current generation.
  fn schedule_write(&self, identity: RequestIdentity, response: StoredResponse) -> JoinHandle<()> {
    let store = Arc::clone(&self.store);
    let generation = self.generation.clone();

    tokio::spawn(async move {
      if let Err(e) = store.put(&generation, &identity, &response) {
        warn!(target: "fetch", "Opportunistic write for {} failed: {}", identity.url(), e);
      }
    })
  }
}

/// The synthetic offline page.
fn offline_response() -> StoredResponse {
  StoredResponse::new(
    200,
    vec![("content-type".to_string(), "text/html".to_string())],
    OFFLINE_PAGE.as_bytes().to_vec(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const GENERATION: &str = "app-v1.0.10";

  fn interceptor(store: Arc<MemoryStore>) -> FetchInterceptor<MemoryStore> {
    FetchInterceptor::new(store, GENERATION.to_string())
  }

  fn url(path: &str) -> Url {
    Url::parse(&format!("https://example.com{}", path)).unwrap()
  }

  fn document(path: &str) -> FetchRequest {
    FetchRequest::get(url(path), Destination::Document)
  }

  fn asset(path: &str) -> FetchRequest {
    FetchRequest::get(url(path), Destination::Style)
  }

  fn network_response(body: &str) -> StoredResponse {
    StoredResponse::new(
      200,
      vec![("content-type".to_string(), "text/html".to_string())],
      body.as_bytes().to_vec(),
    )
  }

  fn expect_intercepted(outcome: FetchOutcome) -> FetchResponse {
    match outcome {
      FetchOutcome::Intercepted(response) => response,
      FetchOutcome::PassThrough => panic!("expected interception"),
    }
  }

  #[test]
  fn test_destination_from_path() {
    assert_eq!(Destination::from_path("/index.html"), Destination::Document);
    assert_eq!(Destination::from_path("/js/booking.js"), Destination::Script);
    assert_eq!(Destination::from_path("/css/style2.css"), Destination::Style);
    assert_eq!(Destination::from_path("/images/logo/logo.png"), Destination::Image);
    assert_eq!(Destination::from_path("/fonts/body.woff2"), Destination::Font);
    assert_eq!(Destination::from_path("/"), Destination::Other);
    assert_eq!(Destination::from_path("/api/version"), Destination::Other);
    assert_eq!(Destination::from_path("/manifest.json"), Destination::Other);
  }

  #[tokio::test]
  async fn test_non_get_passes_through() {
    let store = Arc::new(MemoryStore::new());
    let interceptor = interceptor(store);

    let mut request = document("/booking");
    request.method = "POST".to_string();

    let outcome = interceptor
      .handle(&request, || async { panic!("network must not be touched") })
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::PassThrough));
  }

  #[tokio::test]
  async fn test_cached_asset_served_without_network() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation(GENERATION).unwrap();
    let request = asset("/css/style2.css");
    store
      .put(
        GENERATION,
        &RequestIdentity::get(request.url.clone()),
        &network_response("cached css"),
      )
      .unwrap();

    let calls = AtomicUsize::new(0);
    let interceptor = interceptor(Arc::clone(&store));
    let result = expect_intercepted(
      interceptor
        .handle(&request, || {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Ok(network_response("fresh css")) }
        })
        .await
        .unwrap(),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body, b"cached css");
  }

  #[tokio::test]
  async fn test_asset_miss_fetches_and_caches() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation(GENERATION).unwrap();
    let interceptor = interceptor(Arc::clone(&store));
    let request = asset("/js/booking.js");

    let result = expect_intercepted(
      interceptor
        .handle(&request, || async { Ok(network_response("js body")) })
        .await
        .unwrap(),
    );

    assert_eq!(result.source, ResponseSource::Network);
    result.cache_write.unwrap().await.unwrap();

    let stored = store
      .get(GENERATION, &RequestIdentity::get(request.url.clone()))
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"js body");
  }

  #[tokio::test]
  async fn test_opportunistic_write_persists_to_fresh_sqlite_store() {
    // No install has run, so the generation has no row yet. The write
    // must still land, same as with the in-memory store.
    let store = Arc::new(crate::store::SqliteStore::open_in_memory().unwrap());
    let interceptor = FetchInterceptor::new(Arc::clone(&store), GENERATION.to_string());
    let request = asset("/css/style2.css");

    let result = expect_intercepted(
      interceptor
        .handle(&request, || async { Ok(network_response("css body")) })
        .await
        .unwrap(),
    );

    assert_eq!(result.source, ResponseSource::Network);
    result.cache_write.unwrap().await.unwrap();

    let stored = store
      .get(GENERATION, &RequestIdentity::get(request.url.clone()))
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"css body");
  }

  #[tokio::test]
  async fn test_asset_non_success_not_persisted() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation(GENERATION).unwrap();
    let interceptor = interceptor(Arc::clone(&store));
    let request = asset("/js/missing.js");

    let result = expect_intercepted(
      interceptor
        .handle(&request, || async {
          Ok(StoredResponse::new(404, vec![], b"not found".to_vec()))
        })
        .await
        .unwrap(),
    );

    assert_eq!(result.response.status, 404);
    assert!(result.cache_write.is_none());
    assert!(store
      .get(GENERATION, &RequestIdentity::get(request.url.clone()))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_asset_network_error_propagates() {
    let store = Arc::new(MemoryStore::new());
    let interceptor = interceptor(store);

    let result = interceptor
      .handle(&asset("/css/style2.css"), || async {
        Err(eyre!("connection refused"))
      })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_document_network_success_updates_cache() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation(GENERATION).unwrap();
    let interceptor = interceptor(Arc::clone(&store));
    let request = document("/index.html");

    let result = expect_intercepted(
      interceptor
        .handle(&request, || async { Ok(network_response("<html>fresh</html>")) })
        .await
        .unwrap(),
    );

    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(result.response.body, b"<html>fresh</html>");
    result.cache_write.unwrap().await.unwrap();

    let stored = store
      .get(GENERATION, &RequestIdentity::get(request.url.clone()))
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"<html>fresh</html>");
  }

  #[tokio::test]
  async fn test_document_network_failure_falls_back_to_cache() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation(GENERATION).unwrap();
    let request = document("/index.html");
    store
      .put(
        GENERATION,
        &RequestIdentity::get(request.url.clone()),
        &network_response("<html>stale</html>"),
      )
      .unwrap();

    let interceptor = interceptor(Arc::clone(&store));
    let result = expect_intercepted(
      interceptor
        .handle(&request, || async { Err(eyre!("offline")) })
        .await
        .unwrap(),
    );

    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body, b"<html>stale</html>");
  }

  #[tokio::test]
  async fn test_document_offline_placeholder() {
    let store = Arc::new(MemoryStore::new());
    let interceptor = interceptor(store);

    let result = expect_intercepted(
      interceptor
        .handle(&document("/index.html"), || async { Err(eyre!("offline")) })
        .await
        .unwrap(),
    );

    assert_eq!(result.source, ResponseSource::OfflineFallback);
    assert_eq!(result.response.status, 200);
    assert_eq!(result.response.header("content-type"), Some("text/html"));
    assert!(String::from_utf8(result.response.body.clone())
      .unwrap()
      .contains("Offline Mode"));
  }

  #[tokio::test]
  async fn test_document_non_success_returned_unpersisted() {
    let store = Arc::new(MemoryStore::new());
    store.create_generation(GENERATION).unwrap();
    let interceptor = interceptor(Arc::clone(&store));
    let request = document("/admin/panel.html");

    let result = expect_intercepted(
      interceptor
        .handle(&request, || async {
          Ok(StoredResponse::new(500, vec![], vec![]))
        })
        .await
        .unwrap(),
    );

    assert_eq!(result.response.status, 500);
    assert!(result.cache_write.is_none());
    assert!(store
      .get(GENERATION, &RequestIdentity::get(request.url.clone()))
      .unwrap()
      .is_none());
  }
}
