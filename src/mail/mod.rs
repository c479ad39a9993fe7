//! Email delivery: validation, primary provider channel, mailto fallback,
//! and the offline retry queue.

mod mailto;
mod provider;
mod queue;
mod validate;

pub use mailto::{MailComposer, MailtoChannel, SystemComposer};
pub use provider::ProviderClient;
pub use queue::DeliveryQueue;
pub use validate::{validate, ValidationError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validated contact-form submission.
///
/// The payload is a defined record, not a loose field map: required fields
/// are plain strings checked non-empty at the boundary, the rest optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
  #[serde(default)]
  pub nom: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub prenom: Option<String>,
  #[serde(default)]
  pub telephone: Option<String>,
  #[serde(default)]
  pub prestation: Option<String>,
  #[serde(default)]
  pub objet: Option<String>,
}

/// Which channel carried (or will carry) a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
  Primary,
  Fallback,
}

/// Result of a `submit` call. Transport failures never produce
/// `success: false`; they are absorbed into the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
  pub success: bool,
  #[serde(default)]
  pub queued: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub method: Option<DeliveryMethod>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl SubmitOutcome {
  pub fn sent(method: DeliveryMethod) -> Self {
    Self {
      success: true,
      queued: false,
      method: Some(method),
      error: None,
    }
  }

  pub fn queued() -> Self {
    Self {
      success: true,
      queued: true,
      method: None,
      error: None,
    }
  }

  pub fn rejected(error: impl std::fmt::Display) -> Self {
    Self {
      success: false,
      queued: false,
      method: None,
      error: Some(error.to_string()),
    }
  }
}

/// Lifecycle of a queued submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
  Pending,
  Sending,
  Delivered,
  Failed,
}

/// A submission parked for retry. Owned by the delivery queue; persisted
/// through the state store on every status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
  pub id: String,
  pub submitted_at: DateTime<Utc>,
  pub payload: Submission,
  pub status: MessageStatus,
  #[serde(default)]
  pub attempts: u32,
}

impl QueuedMessage {
  pub fn new(payload: Submission) -> Self {
    let now = Utc::now();
    Self {
      // Timestamp for ordering, uuid as tie-break
      id: format!("{}-{}", now.timestamp_millis(), Uuid::new_v4().simple()),
      submitted_at: now,
      payload,
      status: MessageStatus::Pending,
      attempts: 0,
    }
  }
}
