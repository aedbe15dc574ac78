use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::services::gateway::PaymentGateway;
use crate::services::notifications::{BroadcastNotifier, NotificationSink};

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub gateway: Box<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationSink>,
    /// Feeds the server-sent event stream; `notifier` usually wraps the same channel.
    pub events: Arc<BroadcastNotifier>,
}

impl AppState {
    /// Never hold the guard across an `.await`.
    pub fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AppError::Transient("database handle poisoned".to_string()))
    }
}
