use std::sync::Arc;

use helmwatch_core::detect::ChannelSourceHandle;
use helmwatch_core::enrich::PersistenceService;
use helmwatch_core::{Config, PipelineOrchestrator, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<PipelineOrchestrator>,
    reports: Arc<dyn PersistenceService>,
    frames: ChannelSourceHandle,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<PipelineOrchestrator>,
        reports: Arc<dyn PersistenceService>,
        frames: ChannelSourceHandle,
    ) -> Self {
        Self {
            config,
            orchestrator,
            reports,
            frames,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    pub fn reports(&self) -> &Arc<dyn PersistenceService> {
        &self.reports
    }

    pub fn frames(&self) -> &ChannelSourceHandle {
        &self.frames
    }
}
