//! Application wiring: opens the stores, builds the delivery queue and the
//! intercept worker, and drives them from connectivity events.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::info;

use crate::cache::SqliteStorage;
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::intercept::{ControlHandle, InterceptLayer};
use crate::mail::{
  DeliveryQueue, MailtoChannel, ProviderClient, SubmitOutcome, Submission, SystemComposer,
};
use crate::net::{probe, Fetch, ReqwestFetch};
use crate::notify::DesktopNotifier;
use crate::state::StateStore;

pub struct App {
  config: Config,
  fetch: Arc<dyn Fetch>,
  state: Arc<StateStore>,
  queue: Arc<DeliveryQueue>,
  layer: Arc<InterceptLayer<SqliteStorage>>,
  control: ControlHandle,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let fetch: Arc<dyn Fetch> = Arc::new(ReqwestFetch::new(config.provider.timeout())?);
    Self::with_fetch(config, fetch)
  }

  pub fn with_fetch(config: Config, fetch: Arc<dyn Fetch>) -> Result<Self> {
    let storage = Arc::new(SqliteStorage::open()?);
    let state = Arc::new(StateStore::open());

    let layer = Arc::new(InterceptLayer::new(
      storage,
      fetch.clone(),
      config.cache.clone(),
      &config.provider.endpoint,
    ));
    let control = ControlHandle::spawn(layer.clone());

    // The provider key may come from the environment; fold it in before
    // deciding whether the primary channel is usable at all.
    let mut provider_config = config.provider.clone();
    provider_config.public_key = config.provider_key();
    let fallback_only = !provider_config.is_configured();
    let public_key = provider_config.public_key.clone();

    let notifier = Arc::new(DesktopNotifier::new(state.settings().notifications_enabled));
    let queue = Arc::new(DeliveryQueue::new(
      state.clone(),
      ProviderClient::new(fetch.clone(), provider_config, public_key),
      MailtoChannel::new(config.fallback.clone(), Box::new(SystemComposer)),
      notifier,
      &config.rate_limit,
      fallback_only,
    ));

    Ok(Self {
      config,
      fetch,
      state,
      queue,
      layer,
      control,
    })
  }

  /// Daemon mode: precache, sweep stale cache generations, then let
  /// connectivity transitions drive queue reconciliation until interrupted.
  pub async fn run(&self) -> Result<()> {
    info!("Starting relais, cache version {}", self.layer.version());
    self.layer.install().await;
    self.layer.activate()?;

    let mut events = EventHandler::new(
      self.fetch.clone(),
      self.config.probe.url.clone(),
      Duration::from_secs(self.config.probe.interval_secs),
    );

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => {
          info!("Shutting down");
          break;
        }
        event = events.next() => {
          match event {
            Some(Event::Online) => {
              self.queue.set_online(true);
              let queue = self.queue.clone();
              tokio::spawn(async move {
                queue.reconcile().await;
              });
            }
            Some(Event::Offline) => self.queue.set_online(false),
            Some(Event::Tick) => {}
            None => break,
          }
        }
      }
    }

    Ok(())
  }

  /// One-shot submission: probe connectivity once, then submit.
  pub async fn submit_once(&self, submission: Submission) -> SubmitOutcome {
    let online = probe(self.fetch.as_ref(), &self.config.probe.url).await;
    self.queue.set_online(online);
    self.queue.submit(submission).await
  }

  /// One-shot reconciliation pass over the persisted queue.
  pub async fn reconcile_once(&self) -> usize {
    self.queue.set_online(true);
    self.queue.reconcile().await
  }

  pub async fn print_status(&self) -> Result<()> {
    println!("Cache version: {}", self.control.get_version().await?);

    let queue = self.state.queue();
    if queue.is_empty() {
      println!("Queue: empty");
      return Ok(());
    }

    println!("Queue: {} message(s)", queue.len());
    for message in queue {
      println!(
        "  {}  {:?}  attempts={}  {} <{}>",
        message.id, message.status, message.attempts, message.payload.nom, message.payload.email
      );
    }
    Ok(())
  }

  pub async fn clear_cache(&self) -> Result<bool> {
    self.control.clear_cache().await
  }
}
