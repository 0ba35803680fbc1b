pub mod admission;
pub mod config;
pub mod detect;
pub mod enrich;
pub mod event;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod testing;
pub mod worker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use orchestrator::{
    AdmitOutcome, OrchestratorConfig, OrchestratorError, PipelineOrchestrator, PipelineState,
    StatusSnapshot,
};
