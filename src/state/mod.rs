//! Persisted application state: settings, retry queue, form drafts.
//!
//! A single JSON document, loaded once at startup and rewritten in full on
//! every mutation. The store is the sole writer of persisted state; the
//! delivery queue and settings holders go through it. Persistence failures
//! are logged and the store degrades to in-memory-only operation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::mail::{MessageStatus, QueuedMessage};

/// Drafts older than this are discarded on read.
const DRAFT_STALENESS: i64 = 3600; // seconds

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("state io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("state serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

/// User-facing flags. Loaded once, persisted immediately on change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub notifications_enabled: bool,
  pub save_drafts: bool,
  pub alternate_channel_enabled: bool,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      notifications_enabled: true,
      save_drafts: true,
      alternate_channel_enabled: true,
    }
  }
}

/// Per-form field snapshot with its save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
  pub fields: BTreeMap<String, String>,
  pub saved_at: DateTime<Utc>,
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
  pub settings: Settings,
  pub queue: Vec<QueuedMessage>,
  pub drafts: BTreeMap<String, Draft>,
  pub last_save: Option<DateTime<Utc>>,
}

/// Handle to the persisted state document.
pub struct StateStore {
  path: Option<PathBuf>,
  state: Mutex<State>,
}

impl StateStore {
  /// Open the store at the default location. Never fails: an unreadable or
  /// unparseable document falls back to defaults, a missing data directory
  /// to in-memory operation.
  pub fn open() -> Self {
    match Self::default_path() {
      Some(path) => Self::at_path(path),
      None => {
        warn!("Could not determine data directory, state will not persist");
        Self::ephemeral()
      }
    }
  }

  /// Open the store backed by a specific file.
  pub fn at_path(path: PathBuf) -> Self {
    let state = Self::load_from(&path);
    Self {
      path: Some(path),
      state: Mutex::new(state),
    }
  }

  /// In-memory store with no persistence.
  pub fn ephemeral() -> Self {
    Self {
      path: None,
      state: Mutex::new(State::default()),
    }
  }

  fn default_path() -> Option<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("relais").join("state.json"))
  }

  /// Merge the persisted document over defaults; defaults win for missing
  /// keys (serde `default` on every field handles the merge).
  fn load_from(path: &PathBuf) -> State {
    let contents = match std::fs::read_to_string(path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return State::default(),
      Err(e) => {
        warn!("Failed to read state file {}: {}", path.display(), e);
        return State::default();
      }
    };

    match serde_json::from_str::<State>(&contents) {
      Ok(mut state) => {
        // A send interrupted mid-flight left its message as Sending;
        // nothing would ever pick it up again, so it resumes as Pending.
        for message in &mut state.queue {
          if message.status == MessageStatus::Sending {
            message.status = MessageStatus::Pending;
          }
        }
        state
      }
      Err(e) => {
        warn!("Failed to parse state file {}: {}", path.display(), e);
        State::default()
      }
    }
  }

  /// Full-document overwrite. Idempotent; called after every mutation.
  fn try_persist(&self, state: &State) -> Result<(), StorageError> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
  }

  /// Persistence errors never cross this boundary: log and carry on with
  /// the in-memory state.
  fn persist(&self, state: &mut State) {
    state.last_save = Some(Utc::now());
    if let Err(e) = self.try_persist(state) {
      warn!("State persistence failed, continuing in memory: {}", e);
    }
  }

  fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
    let mut state = match self.state.lock() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut state)
  }

  // -- Settings ------------------------------------------------------------

  pub fn settings(&self) -> Settings {
    self.with_state(|state| state.settings.clone())
  }

  pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) -> Settings {
    self.with_state(|state| {
      f(&mut state.settings);
      self.persist(state);
      state.settings.clone()
    })
  }

  // -- Retry queue ---------------------------------------------------------

  pub fn enqueue(&self, message: QueuedMessage) {
    self.with_state(|state| {
      state.queue.push(message);
      self.persist(state);
    });
  }

  /// Snapshot of the whole queue, in insertion order.
  pub fn queue(&self) -> Vec<QueuedMessage> {
    self.with_state(|state| state.queue.clone())
  }

  /// Ids of pending messages, in insertion order. A snapshot: reconciliation
  /// iterates this while the underlying set may change.
  pub fn pending_ids(&self) -> Vec<String> {
    self.with_state(|state| {
      state
        .queue
        .iter()
        .filter(|m| m.status == MessageStatus::Pending)
        .map(|m| m.id.clone())
        .collect()
    })
  }

  pub fn message(&self, id: &str) -> Option<QueuedMessage> {
    self.with_state(|state| state.queue.iter().find(|m| m.id == id).cloned())
  }

  pub fn set_status(&self, id: &str, status: MessageStatus) -> bool {
    self.with_state(|state| {
      let Some(message) = state.queue.iter_mut().find(|m| m.id == id) else {
        return false;
      };
      message.status = status;
      self.persist(state);
      true
    })
  }

  pub fn record_attempt(&self, id: &str) -> u32 {
    self.with_state(|state| {
      let Some(message) = state.queue.iter_mut().find(|m| m.id == id) else {
        return 0;
      };
      message.attempts += 1;
      let attempts = message.attempts;
      self.persist(state);
      attempts
    })
  }

  pub fn remove(&self, id: &str) -> bool {
    self.with_state(|state| {
      let before = state.queue.len();
      state.queue.retain(|m| m.id != id);
      let removed = state.queue.len() != before;
      if removed {
        self.persist(state);
      }
      removed
    })
  }

  // -- Drafts --------------------------------------------------------------

  pub fn save_draft(&self, form_id: &str, fields: BTreeMap<String, String>) {
    if !self.settings().save_drafts {
      return;
    }
    self.save_draft_at(form_id, fields, Utc::now());
  }

  fn save_draft_at(&self, form_id: &str, fields: BTreeMap<String, String>, saved_at: DateTime<Utc>) {
    self.with_state(|state| {
      state
        .drafts
        .insert(form_id.to_string(), Draft { fields, saved_at });
      self.persist(state);
    });
  }

  /// Restore a draft if it is younger than the staleness window.
  /// Stale drafts are discarded on read and never restored.
  pub fn restore_draft(&self, form_id: &str) -> Option<BTreeMap<String, String>> {
    self.with_state(|state| {
      let saved_at = state.drafts.get(form_id)?.saved_at;
      if Utc::now() - saved_at > Duration::seconds(DRAFT_STALENESS) {
        debug!("Discarding stale draft for {}", form_id);
        state.drafts.remove(form_id);
        self.persist(state);
        return None;
      }
      state.drafts.get(form_id).map(|d| d.fields.clone())
    })
  }

  pub fn clear_draft(&self, form_id: &str) {
    self.with_state(|state| {
      if state.drafts.remove(form_id).is_some() {
        self.persist(state);
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mail::Submission;

  fn temp_state_path() -> PathBuf {
    std::env::temp_dir().join(format!("relais-state-{}.json", uuid::Uuid::new_v4()))
  }

  fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_save_load_round_trip() {
    let path = temp_state_path();

    let store = StateStore::at_path(path.clone());
    store.enqueue(QueuedMessage::new(Submission {
      nom: "Dupont".to_string(),
      email: "a@b.fr".to_string(),
      message: "bonjour".to_string(),
      ..Submission::default()
    }));
    store.update_settings(|s| s.notifications_enabled = false);

    let reopened = StateStore::at_path(path.clone());
    assert_eq!(reopened.queue().len(), 1);
    assert_eq!(reopened.queue()[0].payload.nom, "Dupont");
    assert!(!reopened.settings().notifications_enabled);
    // Defaults win for keys the document doesn't override.
    assert!(reopened.settings().save_drafts);

    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn test_interrupted_send_resumes_as_pending_after_reload() {
    let path = temp_state_path();

    let store = StateStore::at_path(path.clone());
    let message = QueuedMessage::new(Submission::default());
    let id = message.id.clone();
    store.enqueue(message);
    store.set_status(&id, MessageStatus::Sending);
    assert!(store.pending_ids().is_empty());

    // A crash between the status write and the send leaves the document
    // holding a Sending message; on reload it must be retryable again.
    let reopened = StateStore::at_path(path.clone());
    assert_eq!(reopened.pending_ids(), vec![id]);

    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn test_corrupt_document_degrades_to_defaults() {
    let path = temp_state_path();
    std::fs::write(&path, b"{not json").unwrap();

    let store = StateStore::at_path(path.clone());
    assert!(store.queue().is_empty());
    assert!(store.settings().notifications_enabled);

    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn test_ephemeral_store_keeps_state_in_memory() {
    let store = StateStore::ephemeral();
    store.enqueue(QueuedMessage::new(Submission::default()));
    assert_eq!(store.queue().len(), 1);
  }

  #[test]
  fn test_status_and_attempt_updates() {
    let store = StateStore::ephemeral();
    let message = QueuedMessage::new(Submission::default());
    let id = message.id.clone();
    store.enqueue(message);

    assert!(store.set_status(&id, MessageStatus::Sending));
    assert_eq!(store.pending_ids().len(), 0);

    assert_eq!(store.record_attempt(&id), 1);
    assert_eq!(store.record_attempt(&id), 2);

    assert!(store.set_status(&id, MessageStatus::Pending));
    assert_eq!(store.pending_ids(), vec![id.clone()]);

    assert!(store.remove(&id));
    assert!(!store.remove(&id));
  }

  #[test]
  fn test_fresh_draft_restores_field_for_field() {
    let store = StateStore::ephemeral();
    let draft = fields(&[("nom", "Dupont"), ("message", "bonjour")]);
    store.save_draft("contact-form", draft.clone());

    assert_eq!(store.restore_draft("contact-form"), Some(draft));
  }

  #[test]
  fn test_stale_draft_is_discarded_on_read() {
    let store = StateStore::ephemeral();
    store.save_draft_at(
      "contact-form",
      fields(&[("nom", "Dupont")]),
      Utc::now() - Duration::hours(2),
    );

    assert_eq!(store.restore_draft("contact-form"), None);
    // Discarded, not merely skipped.
    assert_eq!(store.restore_draft("contact-form"), None);
  }

  #[test]
  fn test_drafts_disabled_by_settings() {
    let store = StateStore::ephemeral();
    store.update_settings(|s| s.save_drafts = false);
    store.save_draft("contact-form", fields(&[("nom", "Dupont")]));

    assert_eq!(store.restore_draft("contact-form"), None);
  }
}
