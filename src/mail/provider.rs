//! Primary delivery channel: templated POST to the transactional email
//! provider, with a small fixed retry budget per call.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::net::{Fetch, HttpRequest, TransportError};

use super::Submission;

pub struct ProviderClient {
  fetch: Arc<dyn Fetch>,
  config: ProviderConfig,
  public_key: String,
}

impl ProviderClient {
  pub fn new(fetch: Arc<dyn Fetch>, config: ProviderConfig, public_key: String) -> Self {
    Self {
      fetch,
      config,
      public_key,
    }
  }

  /// Deliver one submission. Tries `1 + retry_attempts` times with a fixed
  /// delay; each attempt is bounded by the per-attempt timeout. No backoff.
  pub async fn send(&self, submission: &Submission) -> Result<(), TransportError> {
    let request = self.build_request(submission);
    let total = 1 + self.config.retry_attempts;
    let mut last_error = TransportError::Network("no attempt made".to_string());

    for attempt in 1..=total {
      if attempt > 1 {
        tokio::time::sleep(self.config.retry_delay()).await;
      }

      match self.attempt(&request).await {
        Ok(()) => {
          debug!("Provider accepted submission on attempt {}/{}", attempt, total);
          return Ok(());
        }
        Err(e) => {
          warn!("Provider attempt {}/{} failed: {}", attempt, total, e);
          last_error = e;
        }
      }
    }

    Err(last_error)
  }

  async fn attempt(&self, request: &HttpRequest) -> Result<(), TransportError> {
    let timeout = self.config.timeout();
    let response = match tokio::time::timeout(timeout, self.fetch.fetch(request)).await {
      Ok(result) => result?,
      Err(_) => return Err(TransportError::Timeout(timeout)),
    };

    if response.is_success() {
      Ok(())
    } else {
      Err(TransportError::Status(response.status))
    }
  }

  fn build_request(&self, submission: &Submission) -> HttpRequest {
    let params = serde_json::json!({
      "nom": submission.nom,
      "prenom": submission.prenom.as_deref().unwrap_or(""),
      "email": submission.email,
      "telephone": submission.telephone.as_deref().unwrap_or(""),
      "prestation": submission.prestation.as_deref().unwrap_or(""),
      "objet": submission.objet.as_deref().unwrap_or(""),
      "message": submission.message,
      "date": Utc::now().to_rfc3339(),
    });

    HttpRequest::post_json(
      &self.config.endpoint,
      &serde_json::json!({
        "service_id": self.config.service_id,
        "template_id": self.config.template_id,
        "user_id": self.public_key,
        "template_params": params,
      }),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::FakeFetch;
  use crate::net::HttpResponse;

  fn config() -> ProviderConfig {
    ProviderConfig {
      service_id: "service_abc".to_string(),
      template_id: "template_abc".to_string(),
      public_key: "key_abc".to_string(),
      retry_delay_ms: 0,
      ..ProviderConfig::default()
    }
  }

  fn submission() -> Submission {
    Submission {
      nom: "Dupont".to_string(),
      email: "client@example.fr".to_string(),
      message: "bonjour".to_string(),
      prestation: Some("Montage".to_string()),
      ..Submission::default()
    }
  }

  #[tokio::test]
  async fn test_request_shape() {
    let fetch = Arc::new(FakeFetch::healthy());
    let client = ProviderClient::new(fetch.clone(), config(), "key_abc".to_string());

    client.send(&submission()).await.unwrap();

    let requests = fetch.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].url, "https://api.emailjs.com/api/v1.0/email/send");

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["service_id"], "service_abc");
    assert_eq!(body["user_id"], "key_abc");
    assert_eq!(body["template_params"]["nom"], "Dupont");
    assert_eq!(body["template_params"]["prestation"], "Montage");
    // Optional fields render as empty strings, not nulls.
    assert_eq!(body["template_params"]["telephone"], "");
  }

  #[tokio::test]
  async fn test_retry_budget_then_success() {
    let fetch = Arc::new(
      FakeFetch::healthy()
        .push(Err(TransportError::Network("down".to_string())))
        .push(Err(TransportError::Status(502))),
    );
    let client = ProviderClient::new(fetch.clone(), config(), "key_abc".to_string());

    // Two failures, then the default healthy 200 on the third attempt.
    client.send(&submission()).await.unwrap();
    assert_eq!(fetch.request_count(), 3);
  }

  #[tokio::test]
  async fn test_retry_budget_exhaustion() {
    let fetch = Arc::new(FakeFetch::offline());
    let client = ProviderClient::new(fetch.clone(), config(), "key_abc".to_string());

    let result = client.send(&submission()).await;
    assert!(result.is_err());
    // 1 initial + 2 retries
    assert_eq!(fetch.request_count(), 3);
  }

  #[tokio::test]
  async fn test_non_2xx_is_a_failure() {
    let fetch = Arc::new(
      FakeFetch::healthy()
        .push(Ok(HttpResponse::json(500, &serde_json::json!({}))))
        .push(Ok(HttpResponse::json(200, &serde_json::json!({})))),
    );
    let client = ProviderClient::new(fetch.clone(), config(), "key_abc".to_string());

    client.send(&submission()).await.unwrap();
    assert_eq!(fetch.request_count(), 2);
  }
}
