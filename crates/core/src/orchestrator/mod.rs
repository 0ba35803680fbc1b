//! Pipeline lifecycle orchestration.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::PipelineOrchestrator;
pub use types::{
    AdmitOutcome, CountersSnapshot, OrchestratorError, PipelineCounters, PipelineState,
    StatusSnapshot,
};
