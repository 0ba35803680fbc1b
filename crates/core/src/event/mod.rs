//! Typed pipeline events and the observer hub.
//!
//! Events are a closed set of tagged variants with a typed payload each,
//! dispatched through one `notify` entry point. Handlers run synchronously,
//! in registration order, on the task performing the triggering transition.
//! A handler that fails is logged and counted; it never aborts the pipeline
//! or affects a job's outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

use crate::detect::Severity;
use crate::queue::Priority;

/// Pipeline events observable from outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A violation passed admission and was queued for enrichment.
    ViolationAdmitted {
        report_id: String,
        device_id: String,
        severity: Severity,
        summary: String,
        person_count: usize,
        violation_count: usize,
        admitted_at: DateTime<Utc>,
    },
    /// A queued job finished the enrichment sequence and was persisted.
    ReportReady {
        report_id: String,
        device_id: String,
        priority: Priority,
        attempts: u32,
    },
    /// An admission was rejected because the queue is at capacity.
    Backpressure {
        device_id: String,
        queue_capacity: usize,
    },
    /// A job or handler failed; `permanent` marks a dropped job.
    Error {
        report_id: Option<String>,
        message: String,
        permanent: bool,
    },
}

impl PipelineEvent {
    /// Discriminant name, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::ViolationAdmitted { .. } => "violation_admitted",
            PipelineEvent::ReportReady { .. } => "report_ready",
            PipelineEvent::Backpressure { .. } => "backpressure",
            PipelineEvent::Error { .. } => "error",
        }
    }
}

/// Error returned by a failing event handler.
#[derive(Debug, thiserror::Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

/// An observer of pipeline events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &PipelineEvent) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&PipelineEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &PipelineEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Registry of event handlers with isolated failure handling.
pub struct EventHub {
    handlers: Mutex<Vec<Box<dyn EventHandler>>>,
    handler_errors: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            handler_errors: AtomicU64::new(0),
        }
    }

    /// Register a handler. Handlers are invoked in registration order.
    pub fn register(&self, handler: Box<dyn EventHandler>) {
        match self.handlers.lock() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    /// Dispatch an event to every registered handler.
    ///
    /// Returns the number of handlers that failed. Failures are logged and
    /// counted, never propagated.
    pub fn notify(&self, event: &PipelineEvent) -> usize {
        let handlers = match self.handlers.lock() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut failures = 0;
        for handler in handlers.iter() {
            if let Err(e) = handler.handle(event) {
                warn!("Event handler failed on {}: {}", event.kind(), e);
                failures += 1;
            }
        }
        if failures > 0 {
            self.handler_errors
                .fetch_add(failures as u64, Ordering::Relaxed);
        }
        failures
    }

    /// Total handler failures since startup.
    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
