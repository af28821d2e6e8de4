use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// One human-readable message for whatever surface shows toasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

/// Fan-out of user-facing notifications. Publishing never fails, whether or
/// not anybody listens.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "notify");
        self.publish(Notification {
            level: Level::Info,
            message,
        });
    }

    pub fn error(&self, context: &str, err: &SyncError) {
        let message = format!("{context}: {err}");
        warn!(%message, kind = ?err.kind(), "notify");
        self.publish(Notification {
            level: Level::Error,
            message,
        });
    }

    fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("no notification subscribers");
        }
    }
}
