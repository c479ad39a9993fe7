//! Delivery queue: primary channel, persisted retry queue, mailto fallback.
//!
//! The contract: a validated submission is either delivered or safely
//! queued, never silently dropped. Transport failures are absorbed, not
//! surfaced; validation failures are reported synchronously and never
//! reach the queue or the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::notify::{NoticeLevel, Notify};
use crate::state::StateStore;

use super::{
  validate, DeliveryMethod, MailtoChannel, MessageStatus, ProviderClient, QueuedMessage,
  SubmitOutcome, Submission,
};

/// A message that failed this many delivery attempts is marked `Failed`
/// and no longer retried; it stays visible in `status` output.
const MAX_DELIVERY_ATTEMPTS: u32 = 10;

pub struct DeliveryQueue {
  state: Arc<StateStore>,
  provider: ProviderClient,
  mailto: MailtoChannel,
  notify: Arc<dyn Notify>,
  online: AtomicBool,
  /// Set at startup when provider credentials are missing or placeholders:
  /// primary-channel attempts are skipped entirely.
  fallback_only: bool,
  /// Guards against overlapping reconciliation passes triggered by rapid
  /// online/offline flapping.
  reconcile_gate: tokio::sync::Mutex<()>,
  rate: Mutex<RateLimiter>,
}

impl DeliveryQueue {
  pub fn new(
    state: Arc<StateStore>,
    provider: ProviderClient,
    mailto: MailtoChannel,
    notify: Arc<dyn Notify>,
    rate_limit: &RateLimitConfig,
    fallback_only: bool,
  ) -> Self {
    if fallback_only {
      info!("Provider credentials missing or placeholder, operating in fallback-only mode");
    }

    Self {
      state,
      provider,
      mailto,
      notify,
      online: AtomicBool::new(true),
      fallback_only,
      reconcile_gate: tokio::sync::Mutex::new(()),
      rate: Mutex::new(RateLimiter::new(
        rate_limit.max_requests,
        Duration::from_secs(rate_limit.window_secs),
      )),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Submit one form. Never returns a hard failure for transport problems:
  /// those end up queued or handed off to the fallback channel.
  pub async fn submit(&self, submission: Submission) -> SubmitOutcome {
    if let Err(e) = validate(&submission) {
      self
        .notify
        .post(NoticeLevel::Error, &format!("Formulaire invalide : {}", e));
      return SubmitOutcome::rejected(e);
    }

    if !self.allow_rate() {
      self.notify.post(
        NoticeLevel::Warning,
        "Trop de messages envoyés, réessayez dans une minute",
      );
      return SubmitOutcome::rejected("trop de requêtes, réessayez plus tard");
    }

    if self.fallback_only {
      return self.hand_off(&submission);
    }

    if !self.is_online() {
      self.park(submission);
      self.notify.post(
        NoticeLevel::Warning,
        "Hors ligne - message ajouté à la file d'attente",
      );
      return SubmitOutcome::queued();
    }

    match self.provider.send(&submission).await {
      Ok(()) => {
        self
          .notify
          .post(NoticeLevel::Success, "Message envoyé avec succès !");
        SubmitOutcome::sent(DeliveryMethod::Primary)
      }
      Err(e) => {
        warn!("Primary channel failed, queuing message: {}", e);
        self.park(submission);
        self.notify.post(
          NoticeLevel::Error,
          "Erreur d'envoi - message ajouté à la file d'attente",
        );
        SubmitOutcome::queued()
      }
    }
  }

  /// Retry every pending message, in insertion order, without user-facing
  /// notifications. Triggered on regaining connectivity; opportunistic, no
  /// backoff. Overlapping passes are no-ops.
  pub async fn reconcile(&self) -> usize {
    let Ok(_guard) = self.reconcile_gate.try_lock() else {
      debug!("Reconciliation already in progress, skipping");
      return 0;
    };

    if self.fallback_only {
      return 0;
    }

    // Snapshot: the set must not be mutated while scanning.
    let ids = self.state.pending_ids();
    if ids.is_empty() {
      return 0;
    }
    info!("Reconciling {} queued messages", ids.len());

    let mut delivered = 0;
    for id in ids {
      let Some(message) = self.state.message(&id) else {
        continue;
      };
      if message.status != MessageStatus::Pending {
        continue;
      }

      self.state.set_status(&id, MessageStatus::Sending);
      let attempts = self.state.record_attempt(&id);

      match self.provider.send(&message.payload).await {
        Ok(()) => {
          self.state.set_status(&id, MessageStatus::Delivered);
          self.state.remove(&id);
          delivered += 1;
        }
        Err(e) if attempts >= MAX_DELIVERY_ATTEMPTS => {
          warn!("Message {} failed {} attempts, giving up: {}", id, attempts, e);
          self.state.set_status(&id, MessageStatus::Failed);
          self.escalate(&message.payload);
        }
        Err(e) => {
          warn!("Message {} still undeliverable: {}", id, e);
          self.state.set_status(&id, MessageStatus::Pending);
        }
      }
    }

    if delivered > 0 {
      info!("Delivered {} queued messages", delivered);
    }
    delivered
  }

  /// Retry budget exhausted: the message stays visible as `Failed`, the
  /// user gets one notice, and the fallback channel gets the payload so
  /// giving up is never silent.
  fn escalate(&self, submission: &Submission) {
    self.notify.post(
      NoticeLevel::Error,
      "Échec de l'envoi après plusieurs tentatives - ouverture du client de messagerie",
    );
    if self.state.settings().alternate_channel_enabled {
      if let Err(e) = self.mailto.hand_off(submission) {
        warn!("Fallback hand-off failed: {}", e);
      }
    }
  }

  /// Terminal hand-off to the platform mail composer.
  fn hand_off(&self, submission: &Submission) -> SubmitOutcome {
    if !self.state.settings().alternate_channel_enabled {
      self.park(submission.clone());
      self.notify.post(
        NoticeLevel::Warning,
        "Canal de secours désactivé - message ajouté à la file d'attente",
      );
      return SubmitOutcome::queued();
    }

    match self.mailto.hand_off(submission) {
      Ok(()) => {
        self
          .notify
          .post(NoticeLevel::Info, "Ouverture du client de messagerie...");
        SubmitOutcome::sent(DeliveryMethod::Fallback)
      }
      Err(e) => {
        self.notify.post(
          NoticeLevel::Error,
          "Impossible d'ouvrir le client de messagerie",
        );
        SubmitOutcome {
          success: false,
          queued: false,
          method: Some(DeliveryMethod::Fallback),
          error: Some(e),
        }
      }
    }
  }

  fn park(&self, submission: Submission) {
    self.state.enqueue(QueuedMessage::new(submission));
  }

  fn allow_rate(&self) -> bool {
    match self.rate.lock() {
      Ok(mut rate) => rate.allow(Instant::now()),
      Err(poisoned) => poisoned.into_inner().allow(Instant::now()),
    }
  }
}

/// Sliding-window submission limiter (anti-spam).
struct RateLimiter {
  max: usize,
  window: Duration,
  hits: VecDeque<Instant>,
}

impl RateLimiter {
  fn new(max: usize, window: Duration) -> Self {
    Self {
      max,
      window,
      hits: VecDeque::new(),
    }
  }

  fn allow(&mut self, now: Instant) -> bool {
    while let Some(&front) = self.hits.front() {
      if now.duration_since(front) >= self.window {
        self.hits.pop_front();
      } else {
        break;
      }
    }

    if self.hits.len() >= self.max {
      return false;
    }
    self.hits.push_back(now);
    true
  }
}
