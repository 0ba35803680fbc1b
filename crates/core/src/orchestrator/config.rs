//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionConfig;
use crate::worker::WorkerConfig;

/// Top-level pipeline tuning, deserialized from the `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bounded queue capacity; an enqueue beyond it is rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Failed attempts before a job is permanently dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long `pause()` waits for the detection loop to acknowledge
    /// suspension before giving up on the handshake.
    #[serde(default = "default_pause_ack_timeout_ms")]
    pub pause_ack_timeout_ms: u64,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub workers: WorkerConfig,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_pause_ack_timeout_ms() -> u64 {
    2_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            pause_ack_timeout_ms: default_pause_ack_timeout_ms(),
            admission: AdmissionConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}
