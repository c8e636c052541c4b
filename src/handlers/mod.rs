pub mod health;
pub mod logs;
pub mod metrics_handler;

use crate::storage::LogStore;

/// Shared state for log and health endpoints
#[derive(Clone)]
pub struct AppState {
    pub store: LogStore,
}
