//! User-facing notifications.
//!
//! Every terminal submit outcome produces exactly one transient notice.
//! The trait seam keeps the queue testable; the production implementation
//! shows desktop notifications and always leaves a log trail.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Success,
  Warning,
  Error,
}

pub trait Notify: Send + Sync {
  fn post(&self, level: NoticeLevel, message: &str);
}

/// Desktop notifications via the platform notification service.
pub struct DesktopNotifier {
  enabled: bool,
}

impl DesktopNotifier {
  pub fn new(enabled: bool) -> Self {
    Self { enabled }
  }
}

impl Notify for DesktopNotifier {
  fn post(&self, level: NoticeLevel, message: &str) {
    match level {
      NoticeLevel::Info | NoticeLevel::Success => info!("{}", message),
      NoticeLevel::Warning => warn!("{}", message),
      NoticeLevel::Error => error!("{}", message),
    }

    if !self.enabled {
      return;
    }

    let result = notify_rust::Notification::new()
      .summary("Relais")
      .body(message)
      .show();
    if let Err(e) = result {
      warn!("Desktop notification failed: {}", e);
    }
  }
}
