//! Control messages into the intercept layer.
//!
//! Each message is a request/response pair over an internal channel: the
//! page-side collaborator holds a cloneable [`ControlHandle`], the worker
//! task owns the layer and answers on a oneshot per message.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::CacheStorage;

use super::layer::InterceptLayer;

/// Messages accepted by the intercept worker.
pub enum ControlMsg {
  /// Run the activation sweep immediately instead of waiting for restart.
  SkipWaiting {
    reply: oneshot::Sender<Vec<String>>,
  },
  /// Report the current cache generation id.
  GetVersion { reply: oneshot::Sender<String> },
  /// Delete all partitions, current generation included.
  ClearCache { reply: oneshot::Sender<bool> },
  /// Persist a transient form draft blob.
  SaveFormData {
    form_id: String,
    data: serde_json::Value,
    reply: oneshot::Sender<bool>,
  },
}

/// Cloneable async facade over the intercept worker.
#[derive(Clone)]
pub struct ControlHandle {
  tx: mpsc::UnboundedSender<ControlMsg>,
}

impl ControlHandle {
  /// Spawn the worker task that owns the layer and answers control messages.
  pub fn spawn<S: CacheStorage + 'static>(layer: Arc<InterceptLayer<S>>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(msg) = rx.recv().await {
        match msg {
          ControlMsg::SkipWaiting { reply } => {
            let removed = match layer.activate() {
              Ok(removed) => removed,
              Err(e) => {
                warn!("Activation sweep failed: {}", e);
                Vec::new()
              }
            };
            let _ = reply.send(removed);
          }
          ControlMsg::GetVersion { reply } => {
            let _ = reply.send(layer.version());
          }
          ControlMsg::ClearCache { reply } => {
            let ok = match layer.clear() {
              Ok(()) => true,
              Err(e) => {
                warn!("Cache clear failed: {}", e);
                false
              }
            };
            let _ = reply.send(ok);
          }
          ControlMsg::SaveFormData {
            form_id,
            data,
            reply,
          } => {
            let ok = match layer.save_form_data(&form_id, &data) {
              Ok(()) => true,
              Err(e) => {
                warn!("Draft save failed for {}: {}", form_id, e);
                false
              }
            };
            let _ = reply.send(ok);
          }
        }
      }
      debug!("Control channel closed, intercept worker stopping");
    });

    Self { tx }
  }

  pub async fn skip_waiting(&self) -> Result<Vec<String>> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlMsg::SkipWaiting { reply })?;
    rx.await.map_err(|_| eyre!("Intercept worker went away"))
  }

  pub async fn get_version(&self) -> Result<String> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlMsg::GetVersion { reply })?;
    rx.await.map_err(|_| eyre!("Intercept worker went away"))
  }

  pub async fn clear_cache(&self) -> Result<bool> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlMsg::ClearCache { reply })?;
    rx.await.map_err(|_| eyre!("Intercept worker went away"))
  }

  pub async fn save_form_data(&self, form_id: &str, data: serde_json::Value) -> Result<bool> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlMsg::SaveFormData {
      form_id: form_id.to_string(),
      data,
      reply,
    })?;
    rx.await.map_err(|_| eyre!("Intercept worker went away"))
  }

  fn send(&self, msg: ControlMsg) -> Result<()> {
    self
      .tx
      .send(msg)
      .map_err(|_| eyre!("Intercept worker is not running"))
  }
}
