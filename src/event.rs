use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::net::{probe, Fetch};

/// Application events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Connectivity regained (or confirmed at startup)
  Online,
  /// Connectivity lost (or absent at startup)
  Offline,
  /// Periodic probe with no state change
  Tick,
}

/// Event handler that produces connectivity events from a periodic probe.
///
/// The first probe always emits Online or Offline so the consumer learns the
/// initial state; afterwards only transitions emit, the rest are ticks.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler probing `probe_url` every `interval`.
  pub fn new(fetch: Arc<dyn Fetch>, probe_url: String, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut last: Option<bool> = None;
      loop {
        let online = probe(fetch.as_ref(), &probe_url).await;
        let event = match last {
          Some(prev) if prev == online => Event::Tick,
          _ if online => Event::Online,
          _ => Event::Offline,
        };
        last = Some(online);

        if tx.send(event).is_err() {
          break;
        }
        tokio::time::sleep(interval).await;
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
