//! Types for the pipeline orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::Suppression;
use crate::queue::QueueSnapshot;
use crate::worker::PoolStatsSnapshot;

/// Lifecycle state of the pipeline.
///
/// `Idle -> Detecting <-> Paused -> Stopped`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Detecting,
    Paused,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Detecting => "detecting",
            PipelineState::Paused => "paused",
            PipelineState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: PipelineState,
        action: &'static str,
    },

    #[error("pipeline is {state}, not accepting violations")]
    NotAccepting { state: PipelineState },

    #[error("internal pipeline error: {0}")]
    Internal(String),
}

/// Result of submitting or detecting a violation.
#[derive(Debug, Clone)]
pub enum AdmitOutcome {
    /// Admitted and queued under the returned report id.
    Admitted { report_id: String },
    /// Suppressed by the admission gate; expected behavior.
    Suppressed(Suppression),
    /// Rejected because the queue is at capacity.
    Rejected { queue_capacity: usize },
}

/// Frame and admission counters, updated lock-free on the hot path.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub frames_analyzed: AtomicU64,
    pub violations_detected: AtomicU64,
    pub suppressed_cooldown: AtomicU64,
    pub suppressed_rate_limit: AtomicU64,
    pub admitted: AtomicU64,
    pub rejected: AtomicU64,
}

/// Point-in-time view of [`PipelineCounters`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub frames_analyzed: u64,
    pub violations_detected: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_rate_limit: u64,
    pub admitted: u64,
    pub rejected: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            violations_detected: self.violations_detected.load(Ordering::Relaxed),
            suppressed_cooldown: self.suppressed_cooldown.load(Ordering::Relaxed),
            suppressed_rate_limit: self.suppressed_rate_limit.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Full pipeline status, served by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: PipelineState,
    /// Seconds since `start()`, absent before the first start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    pub queue: QueueSnapshot,
    pub workers: PoolStatsSnapshot,
    pub counters: CountersSnapshot,
    /// Remaining cooldown on the most recent admission, zero when elapsed.
    pub cooldown_remaining_ms: u64,
    /// Event handler failures since startup.
    pub handler_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
