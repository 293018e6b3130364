use std::sync::Arc;

use pmm_domain::config::Config;
use pmm_engine::turn::TurnOrchestrator;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<TurnOrchestrator>,
}
