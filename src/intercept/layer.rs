//! Cache/network reconciliation for intercepted requests.

use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{self, CacheStorage, FORM_DATA_PARTITION};
use crate::config::CacheConfig;
use crate::net::{Fetch, HttpRequest, HttpResponse, TransportError};

use super::policy::{classify, RequestClass};

/// Routes intercepted requests between cache and network.
pub struct InterceptLayer<S: CacheStorage> {
  storage: Arc<S>,
  fetch: Arc<dyn Fetch>,
  config: CacheConfig,
  static_partition: String,
  api_partition: String,
  provider_host: String,
}

impl<S: CacheStorage> InterceptLayer<S> {
  pub fn new(
    storage: Arc<S>,
    fetch: Arc<dyn Fetch>,
    config: CacheConfig,
    provider_endpoint: &str,
  ) -> Self {
    let provider_host = Url::parse(provider_endpoint)
      .ok()
      .and_then(|u| u.host_str().map(String::from))
      .unwrap_or_default();

    Self {
      static_partition: cache::static_partition(&config.generation),
      api_partition: cache::api_partition(&config.generation),
      storage,
      fetch,
      config,
      provider_host,
    }
  }

  /// Current cache generation id, reported over the control channel.
  pub fn version(&self) -> String {
    format!("relais-{}", self.config.generation)
  }

  /// Precache the configured static resources. Individual failures are
  /// logged and skipped: install never fails the startup.
  pub async fn install(&self) {
    info!("Precaching {} static resources", self.config.precache.len());

    for path in &self.config.precache {
      let request = HttpRequest::get(self.config.resolve(path));
      match self.fetch.fetch(&request).await {
        Ok(response) if response.is_success() => {
          self.store(&self.static_partition, &request, &response);
        }
        Ok(response) => {
          warn!("Precache of {} returned status {}", request.url, response.status);
        }
        Err(e) => {
          warn!("Precache of {} failed: {}", request.url, e);
        }
      }
    }
  }

  /// Generational sweep: drop every partition outside the expected set.
  /// This is the only eviction policy.
  pub fn activate(&self) -> Result<Vec<String>> {
    let expected = cache::expected_partitions(&self.config.generation);
    let removed = self.storage.delete_all_except(&expected)?;
    for name in &removed {
      info!("Removed stale cache partition {}", name);
    }
    Ok(removed)
  }

  /// Drop every partition, including the current generation.
  pub fn clear(&self) -> Result<()> {
    for name in self.storage.partitions()? {
      self.storage.delete_partition(&name)?;
    }
    Ok(())
  }

  /// Route one intercepted request.
  pub async fn handle(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    match classify(&request.method, &request.url, &self.provider_host) {
      RequestClass::Static { document } => self.handle_static(request, document).await,
      RequestClass::Api => self.handle_api(request).await,
      RequestClass::PassThrough => self.fetch.fetch(request).await,
    }
  }

  /// Cache-first: serve a hit immediately, otherwise fetch and keep a copy.
  /// Offline document requests degrade to the cached root page.
  async fn handle_static(
    &self,
    request: &HttpRequest,
    document: bool,
  ) -> Result<HttpResponse, TransportError> {
    if let Some(cached) = self.lookup(&self.static_partition, request) {
      debug!("Static cache hit for {}", request.url);
      return Ok(cached);
    }

    match self.fetch.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&self.static_partition, request, &response);
        }
        Ok(response)
      }
      Err(e) => {
        if document {
          let root = HttpRequest::get(self.config.resolve(&self.config.root_document));
          if let Some(cached) = self.lookup(&self.static_partition, &root) {
            debug!("Serving cached root document for offline {}", request.url);
            return Ok(cached);
          }
        }
        Err(e)
      }
    }
  }

  /// Network-first: keep a copy of successful responses, fall back to the
  /// last cached response for the same request identity, and as a last
  /// resort synthesize a structured offline reply instead of a raw error.
  async fn handle_api(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    match self.fetch.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&self.api_partition, request, &response);
        }
        Ok(response)
      }
      Err(e) => {
        if let Some(cached) = self.lookup(&self.api_partition, request) {
          debug!("Serving stale API response for {}: {}", request.url, e);
          return Ok(cached);
        }
        debug!("No cached API response for {}: {}", request.url, e);
        Ok(HttpResponse::offline_placeholder())
      }
    }
  }

  /// Write a transient draft blob into the form-data partition.
  pub fn save_form_data(&self, form_id: &str, data: &serde_json::Value) -> Result<()> {
    self
      .storage
      .put(FORM_DATA_PARTITION, form_id, &HttpResponse::json(200, data))
  }

  /// Read back a transient draft blob.
  pub fn form_data(&self, form_id: &str) -> Option<serde_json::Value> {
    let response = self.lookup_key(FORM_DATA_PARTITION, form_id)?;
    serde_json::from_slice(&response.body).ok()
  }

  fn lookup(&self, partition: &str, request: &HttpRequest) -> Option<HttpResponse> {
    self.lookup_key(partition, &request.identity())
  }

  fn lookup_key(&self, partition: &str, key: &str) -> Option<HttpResponse> {
    match self.storage.get(partition, key) {
      Ok(found) => found,
      Err(e) => {
        warn!("Cache lookup failed in {}: {}", partition, e);
        None
      }
    }
  }

  /// Fire-and-forget write: failures are logged and swallowed.
  fn store(&self, partition: &str, request: &HttpRequest, response: &HttpResponse) {
    if let Err(e) = self.storage.put(partition, &request.identity(), response) {
      warn!("Cache write failed for {}: {}", request.url, e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::testing::FakeFetch;

  const ENDPOINT: &str = "https://api.emailjs.com/api/v1.0/email/send";

  fn layer_with(fetch: FakeFetch) -> (InterceptLayer<SqliteStorage>, Arc<FakeFetch>) {
    let config = CacheConfig {
      base_url: "https://example.com".to_string(),
      ..CacheConfig::default()
    };
    let fetch = Arc::new(fetch);
    let layer = InterceptLayer::new(
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      fetch.clone(),
      config,
      ENDPOINT,
    );
    (layer, fetch)
  }

  fn html(body: &str) -> HttpResponse {
    HttpResponse {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[tokio::test]
  async fn test_static_miss_fetches_and_caches() {
    let (layer, fetch) = layer_with(FakeFetch::healthy().push(Ok(html("page"))));
    let request = HttpRequest::get("https://example.com/index.html");

    let response = layer.handle(&request).await.unwrap();
    assert_eq!(response.body, b"page");
    assert_eq!(fetch.request_count(), 1);

    // Second call is served from cache: no further network traffic.
    let again = layer.handle(&request).await.unwrap();
    assert_eq!(again.body, b"page");
    assert_eq!(fetch.request_count(), 1);
  }

  #[tokio::test]
  async fn test_offline_document_falls_back_to_root() {
    let fetch = FakeFetch::offline();
    let (layer, _fetch) = layer_with(fetch);

    // Seed the root document as install() would.
    let root = HttpRequest::get("https://example.com/index.html");
    layer
      .storage
      .put("static-v1", &root.identity(), &html("root"))
      .unwrap();

    let request = HttpRequest::get("https://example.com/services/montage.html");
    let response = layer.handle(&request).await.unwrap();
    assert_eq!(response.body, b"root");
  }

  #[tokio::test]
  async fn test_offline_asset_propagates_failure() {
    let (layer, _fetch) = layer_with(FakeFetch::offline());

    let request = HttpRequest::get("https://example.com/styles.css");
    assert!(layer.handle(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_api_success_is_cached_and_replayed_offline() {
    let body = serde_json::json!({"ok": true});
    let fetch = FakeFetch::offline().push(Ok(HttpResponse::json(200, &body)));
    let (layer, _fetch) = layer_with(fetch);

    let request = HttpRequest::post_json(ENDPOINT, &serde_json::json!({"a": 1}));

    // First call hits the network and stores a copy.
    let first = layer.handle(&request).await.unwrap();
    assert_eq!(first.status, 200);

    // Network now fails: the stale cached response is served.
    let second = layer.handle(&request).await.unwrap();
    assert_eq!(second.status, 200);
    assert_eq!(second.body, first.body);
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_synthesizes_503() {
    let (layer, _fetch) = layer_with(FakeFetch::offline());

    let request = HttpRequest::post_json(ENDPOINT, &serde_json::json!({"a": 1}));
    let response = layer.handle(&request).await.unwrap();

    assert_eq!(response.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["offline"], true);
  }

  #[tokio::test]
  async fn test_api_error_status_not_cached() {
    let fetch = FakeFetch::offline().push(Ok(HttpResponse::json(
      500,
      &serde_json::json!({"ok": false}),
    )));
    let (layer, _fetch) = layer_with(fetch);

    let request = HttpRequest::post_json(ENDPOINT, &serde_json::json!({"a": 1}));

    let first = layer.handle(&request).await.unwrap();
    assert_eq!(first.status, 500);

    // The 500 was not cached, so offline now synthesizes the placeholder.
    let second = layer.handle(&request).await.unwrap();
    assert_eq!(second.status, 503);
  }

  #[tokio::test]
  async fn test_pass_through_is_not_cached() {
    let fetch = FakeFetch::offline().push(Ok(html("image")));
    let (layer, _fetch) = layer_with(fetch);

    let request = HttpRequest::get("https://example.com/logo.png");
    assert!(layer.handle(&request).await.is_ok());
    // Same request offline: no cache to fall back on.
    assert!(layer.handle(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_install_precaches_and_activate_sweeps() {
    let (layer, _fetch) = layer_with(FakeFetch::healthy());

    layer.install().await;
    let root = HttpRequest::get("https://example.com/index.html");
    assert!(layer.lookup(&layer.static_partition, &root).is_some());

    // Plant a stale generation and sweep it.
    layer
      .storage
      .put("static-v0", "old-key", &html("old"))
      .unwrap();
    let removed = layer.activate().unwrap();
    assert_eq!(removed, vec!["static-v0".to_string()]);
  }

  #[tokio::test]
  async fn test_form_data_round_trip() {
    let (layer, _fetch) = layer_with(FakeFetch::healthy());

    let draft = serde_json::json!({"nom": "Dupont", "message": "bonjour"});
    layer.save_form_data("contact-form", &draft).unwrap();

    assert_eq!(layer.form_data("contact-form"), Some(draft));
    assert_eq!(layer.form_data("other-form"), None);
  }
}
