//! Server state.

use std::sync::Arc;

use extensa_core::config::DeliveryConfig;
use extensa_core::extension::ExtensionManager;

/// Maximum request body size (64 KB). Only reload requests carry a body.
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024;

/// State shared across handlers.
#[derive(Clone)]
pub struct ServerState {
    pub manager: Arc<ExtensionManager>,
    pub delivery: DeliveryConfig,
    /// Server start timestamp.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(manager: Arc<ExtensionManager>, delivery: DeliveryConfig) -> Self {
        Self {
            manager,
            delivery,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
