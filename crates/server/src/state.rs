use std::sync::Arc;
use relister_core::{BulkOrchestrator, Config, JobStore, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn JobStore>,
    /// Absent when no bridge is configured; batch endpoints answer 503.
    orchestrator: Option<BulkOrchestrator>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        orchestrator: Option<BulkOrchestrator>,
    ) -> Self {
        Self {
            config,
            store,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn orchestrator(&self) -> Option<&BulkOrchestrator> {
        self.orchestrator.as_ref()
    }
}
