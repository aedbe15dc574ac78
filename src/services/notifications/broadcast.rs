use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::{Notification, NotificationSink};

#[derive(Debug, Clone, Serialize)]
pub struct UserNotification {
    pub user_id: String,
    #[serde(flatten)]
    pub notification: Notification,
    pub created_at: NaiveDateTime,
}

/// Fans notifications out to live subscribers (the SSE stream).
pub struct BroadcastNotifier {
    tx: broadcast::Sender<UserNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserNotification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, user_id: &str, notification: Notification) -> anyhow::Result<()> {
        tracing::debug!(user_id, title = %notification.title, "notify");
        let event = UserNotification {
            user_id: user_id.to_string(),
            notification,
            created_at: Utc::now().naive_utc(),
        };
        // No subscribers is not a failure
        let _ = self.tx.send(event);
        Ok(())
    }
}
