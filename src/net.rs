//! Network fetch boundary.
//!
//! The core never talks to the network directly: it is handed a [`Fetch`]
//! capability and treats requests/responses as plain data. The production
//! implementation wraps reqwest; tests inject scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures. Always recoverable: callers absorb these by
/// queuing, falling back to cache, or handing off to the fallback channel.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  #[error("endpoint returned status {0}")]
  Status(u16),
}

/// A plain request: method, URL, headers, body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
  pub method: String,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn head(url: impl Into<String>) -> Self {
    Self {
      method: "HEAD".to_string(),
      url: url.into(),
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
    Self {
      method: "POST".to_string(),
      url: url.into(),
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: body.to_string().into_bytes(),
    }
  }

  /// Request identity used as the cache key: SHA256 over method + URL.
  /// Stable and fixed-length, so it is safe as a database key.
  pub fn identity(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.trim().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A serialized response: status, headers, body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: value.to_string().into_bytes(),
    }
  }

  /// Structured "offline, retry later" response synthesized when neither
  /// the network nor the cache can answer an API request.
  pub fn offline_placeholder() -> Self {
    Self::json(
      503,
      &serde_json::json!({
        "success": false,
        "error": "Hors ligne - Veuillez réessayer plus tard",
        "offline": true,
      }),
    )
  }
}

/// Opaque network capability handed to the core.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production fetcher backed by reqwest.
pub struct ReqwestFetch {
  client: reqwest::Client,
  timeout: Duration,
}

impl ReqwestFetch {
  pub fn new(timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Network(e.to_string()))?;

    Ok(Self { client, timeout })
  }
}

#[async_trait]
impl Fetch for ReqwestFetch {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| TransportError::Network(format!("invalid method: {}", e)))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        TransportError::Timeout(self.timeout)
      } else {
        TransportError::Network(e.to_string())
      }
    })?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.to_string(),
          value.to_str().unwrap_or_default().to_string(),
        )
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?
      .to_vec();

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}

/// One-shot connectivity check: HEAD against a lightweight endpoint.
/// Any 2xx means online; everything else (including transport errors) does not.
pub async fn probe(fetch: &dyn Fetch, url: &str) -> bool {
  match fetch.fetch(&HttpRequest::head(url)).await {
    Ok(response) => response.is_success(),
    Err(_) => false,
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted fetcher shared by intercept and queue tests.

  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  pub struct FakeFetch {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    when_empty: Result<HttpResponse, TransportError>,
    requests: Mutex<Vec<HttpRequest>>,
  }

  impl FakeFetch {
    /// Every request succeeds with an empty 200.
    pub fn healthy() -> Self {
      Self {
        script: Mutex::new(VecDeque::new()),
        when_empty: Ok(HttpResponse {
          status: 200,
          headers: Vec::new(),
          body: b"OK".to_vec(),
        }),
        requests: Mutex::new(Vec::new()),
      }
    }

    /// Every request fails with a network error.
    pub fn offline() -> Self {
      Self {
        script: Mutex::new(VecDeque::new()),
        when_empty: Err(TransportError::Network("connection refused".to_string())),
        requests: Mutex::new(Vec::new()),
      }
    }

    /// Queue a scripted result served before the default.
    pub fn push(self, result: Result<HttpResponse, TransportError>) -> Self {
      self.script.lock().unwrap().push_back(result);
      self
    }

    pub fn request_count(&self) -> usize {
      self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
      self.requests.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Fetch for FakeFetch {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
      self.requests.lock().unwrap().push(request.clone());
      match self.script.lock().unwrap().pop_front() {
        Some(result) => result,
        None => self.when_empty.clone(),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identity_is_stable() {
    let a = HttpRequest::get("https://example.com/index.html");
    let b = HttpRequest::get("https://example.com/index.html");
    assert_eq!(a.identity(), b.identity());
  }

  #[test]
  fn test_identity_distinguishes_method_and_url() {
    let get = HttpRequest::get("https://example.com/api/send");
    let post = HttpRequest::post_json("https://example.com/api/send", &serde_json::json!({}));
    assert_ne!(get.identity(), post.identity());

    let other = HttpRequest::get("https://example.com/api/other");
    assert_ne!(get.identity(), other.identity());
  }

  #[test]
  fn test_offline_placeholder_shape() {
    let response = HttpResponse::offline_placeholder();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["offline"], true);
  }

  #[tokio::test]
  async fn test_timeout_error_carries_configured_duration() {
    // A listener that never answers: the connection opens, the request
    // hangs, and the client-side timeout fires.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let timeout = Duration::from_millis(200);
    let fetch = ReqwestFetch::new(timeout).unwrap();
    let result = fetch.fetch(&HttpRequest::get(format!("http://{}/", addr))).await;

    match result {
      Err(TransportError::Timeout(reported)) => assert_eq!(reported, timeout),
      other => panic!("expected a timeout, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_probe_maps_results_to_bool() {
    let online = testing::FakeFetch::healthy();
    assert!(probe(&online, "https://example.com/favicon.ico").await);

    let offline = testing::FakeFetch::offline();
    assert!(!probe(&offline, "https://example.com/favicon.ico").await);
  }
}
