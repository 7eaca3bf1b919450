use std::sync::Arc;

use tgrelay_core::BridgeContext;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<BridgeContext>,
}

impl AppState {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }
}
