pub mod broadcast;

use serde::{Deserialize, Serialize};

pub use broadcast::{BroadcastNotifier, UserNotification};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Booking,
    Payment,
    Review,
    Wallet,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
            data,
        }
    }
}

/// Best-effort delivery of lifecycle events to users.
///
/// Implementations must not block: they are called right after a
/// transaction commits, usually while the database lock is still held.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, user_id: &str, notification: Notification) -> anyhow::Result<()>;
}

/// Sends and forgets. Sink failures are logged, never returned.
pub fn dispatch(sink: &dyn NotificationSink, user_id: &str, notification: Notification) {
    let title = notification.title.clone();
    if let Err(e) = sink.notify(user_id, notification) {
        tracing::warn!(error = %e, user_id, title = %title, "notification dropped");
    }
}
