//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use citypulse_chat::ChatOrchestrator;
use citypulse_core::config::CityPulseConfig;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CityPulseConfig>,
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: CityPulseConfig, orchestrator: ChatOrchestrator) -> Self {
        Self::from_shared(Arc::new(config), Arc::new(orchestrator))
    }

    /// Build state around an orchestrator that other tasks also hold.
    pub fn from_shared(config: Arc<CityPulseConfig>, orchestrator: Arc<ChatOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
            start_time: Instant::now(),
        }
    }
}
