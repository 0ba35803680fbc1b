//! The pipeline orchestrator.
//!
//! Owns the lifecycle state machine, the admission gate, the queue and the
//! worker pool. The detection source runs on its own task and calls back
//! through [`FrameHandler`]; all collaborators are injected at construction
//! so tests can swap any of them.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionGate, Suppression};
use crate::detect::{
    ControlToken, Detection, DetectionSource, Frame, FrameHandler, RunState, ViolationEvent,
    ViolationRule,
};
use crate::enrich::{PersistenceService, ReportStatus, ViolationReport};
use crate::event::{EventHandler, EventHub, PipelineEvent};
use crate::queue::{QueueError, QueuedJob, ViolationQueue};
use crate::worker::{EnrichmentServices, WorkerPool};

use super::config::OrchestratorConfig;
use super::types::{
    AdmitOutcome, OrchestratorError, PipelineCounters, PipelineState, StatusSnapshot,
};

pub struct PipelineOrchestrator {
    config: OrchestratorConfig,
    source: Arc<dyn DetectionSource>,
    rule: Arc<dyn ViolationRule>,
    persistence: Arc<dyn PersistenceService>,
    queue: Arc<ViolationQueue>,
    workers: WorkerPool,
    events: Arc<EventHub>,
    gate: Mutex<AdmissionGate>,
    token: ControlToken,
    state: Mutex<PipelineState>,
    counters: PipelineCounters,
    started_at: Mutex<Option<std::time::Instant>>,
    last_error: Mutex<Option<String>>,
    source_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        source: Arc<dyn DetectionSource>,
        rule: Arc<dyn ViolationRule>,
        services: EnrichmentServices,
    ) -> Arc<Self> {
        let queue = Arc::new(ViolationQueue::new(
            config.queue_capacity,
            config.max_retries,
        ));
        let events = Arc::new(EventHub::new());
        let persistence = Arc::clone(&services.persistence);
        let workers = WorkerPool::new(
            config.workers.clone(),
            Arc::clone(&queue),
            services,
            Arc::clone(&events),
        );
        let gate = Mutex::new(AdmissionGate::new(config.admission.clone()));

        Arc::new(Self {
            config,
            source,
            rule,
            persistence,
            queue,
            workers,
            events,
            gate,
            token: ControlToken::new(),
            state: Mutex::new(PipelineState::Idle),
            counters: PipelineCounters::default(),
            started_at: Mutex::new(None),
            last_error: Mutex::new(None),
            source_task: tokio::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    /// Register an observer of pipeline events.
    pub fn register_handler(&self, handler: Box<dyn EventHandler>) {
        self.events.register(handler);
    }

    /// Start detection: spawn the source task, resume the control token and
    /// start the worker pool. Valid only from `Idle`.
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        {
            let mut state = lock(&self.state);
            if *state != PipelineState::Idle {
                return Err(OrchestratorError::InvalidTransition {
                    from: *state,
                    action: "start",
                });
            }
            *state = PipelineState::Detecting;
        }
        *lock(&self.started_at) = Some(std::time::Instant::now());

        self.workers.start().await;
        self.token.resume();

        let orchestrator = Arc::clone(self);
        let source = Arc::clone(&self.source);
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            let name = source.name().to_string();
            info!("Detection source '{}' started", name);
            let handler: Arc<dyn FrameHandler> = Arc::clone(&orchestrator) as _;
            if let Err(e) = source.run(handler, token).await {
                error!("Detection source '{}' failed: {}", name, e);
                *lock(&orchestrator.last_error) = Some(e.to_string());
                orchestrator.events.notify(&PipelineEvent::Error {
                    report_id: None,
                    message: format!("detection source failed: {}", e),
                    permanent: false,
                });
            } else {
                info!("Detection source '{}' finished", name);
            }
        });
        *self.source_task.lock().await = Some(handle);

        info!("Pipeline started");
        Ok(())
    }

    /// Suspend detection at the source's next iteration boundary. Workers
    /// keep draining the queue. Valid only from `Detecting`.
    pub async fn pause(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = lock(&self.state);
            if *state != PipelineState::Detecting {
                return Err(OrchestratorError::InvalidTransition {
                    from: *state,
                    action: "pause",
                });
            }
            *state = PipelineState::Paused;
        }

        self.token.suspend();
        let timeout = Duration::from_millis(self.config.pause_ack_timeout_ms);
        if !self.token.wait_acknowledged(RunState::Suspended, timeout).await {
            warn!(
                "Detection loop did not acknowledge suspension within {}ms",
                self.config.pause_ack_timeout_ms
            );
        }
        info!("Pipeline paused");
        Ok(())
    }

    /// Resume detection. Valid only from `Paused`.
    pub async fn resume(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = lock(&self.state);
            if *state != PipelineState::Paused {
                return Err(OrchestratorError::InvalidTransition {
                    from: *state,
                    action: "resume",
                });
            }
            *state = PipelineState::Detecting;
        }
        self.token.resume();
        info!("Pipeline resumed");
        Ok(())
    }

    /// Stop the pipeline: terminate the source, shut down the workers.
    /// Terminal and idempotent.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = lock(&self.state);
            if *state == PipelineState::Stopped {
                return Ok(());
            }
            *state = PipelineState::Stopped;
        }

        self.token.stop();
        if let Some(handle) = self.source_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Detection source task join failed: {}", e);
            }
        }
        self.workers.shutdown().await;
        info!("Pipeline stopped");
        Ok(())
    }

    /// Submit an externally detected violation, bypassing the frame path.
    /// Subject to the same admission gate and queue as detected frames.
    pub async fn submit(
        &self,
        event: ViolationEvent,
    ) -> Result<AdmitOutcome, OrchestratorError> {
        let state = self.state();
        if state != PipelineState::Detecting {
            return Err(OrchestratorError::NotAccepting { state });
        }
        self.counters
            .violations_detected
            .fetch_add(1, Ordering::Relaxed);
        self.admit(event, None).await
    }

    /// Full pipeline status for the status endpoint.
    pub async fn status(&self) -> StatusSnapshot {
        let now = Utc::now();
        let cooldown_remaining_ms =
            lock(&self.gate).cooldown_remaining(now).as_millis() as u64;
        let queue = self.queue.snapshot().await;
        StatusSnapshot {
            state: self.state(),
            uptime_secs: lock(&self.started_at).map(|t| t.elapsed().as_secs()),
            queue,
            workers: self.workers.stats().snapshot(),
            counters: self.counters.snapshot(),
            cooldown_remaining_ms,
            handler_errors: self.events.handler_errors(),
            last_error: lock(&self.last_error).clone(),
        }
    }

    pub fn queue(&self) -> &Arc<ViolationQueue> {
        &self.queue
    }

    /// Admission path shared by the frame handler and `submit`.
    async fn admit(
        &self,
        event: ViolationEvent,
        frame: Option<Frame>,
    ) -> Result<AdmitOutcome, OrchestratorError> {
        let now = Utc::now();
        // Reserving inside one gate lock keeps concurrent submits from both
        // passing within the same cooldown; the reservation is rolled back
        // below if the job never enters the queue.
        let reservation = match lock(&self.gate).reserve(&event.device_id, now) {
            Ok(reservation) => reservation,
            Err(suppression) => {
                match suppression {
                    Suppression::Cooldown { remaining_ms } => {
                        self.counters
                            .suppressed_cooldown
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Suppressed violation on {}: cooldown, {}ms remaining",
                            event.device_id, remaining_ms
                        );
                    }
                    Suppression::RateLimited { retry_after_ms } => {
                        self.counters
                            .suppressed_rate_limit
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Suppressed violation on {}: rate limited, retry in {}ms",
                            event.device_id, retry_after_ms
                        );
                    }
                }
                return Ok(AdmitOutcome::Suppressed(suppression));
            }
        };

        let report_id = make_report_id(&event.device_id);

        // The pending row must exist before a worker can pick up the job.
        let pending = ViolationReport::pending(report_id.clone(), event.clone());
        if let Err(e) = self.persistence.upsert(&pending).await {
            lock(&self.gate).release(reservation);
            return Err(OrchestratorError::Internal(e.to_string()));
        }

        let job = QueuedJob::new(report_id.clone(), event.clone(), frame);
        match self.queue.enqueue(job).await {
            Ok(()) => {}
            Err(QueueError::Full { capacity }) => {
                lock(&self.gate).release(reservation);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Queue at capacity ({}), rejecting violation on {}",
                    capacity, event.device_id
                );
                self.events.notify(&PipelineEvent::Backpressure {
                    device_id: event.device_id.clone(),
                    queue_capacity: capacity,
                });
                if let Err(e) = self
                    .persistence
                    .set_status(
                        &report_id,
                        ReportStatus::Failed,
                        Some("rejected: queue at capacity"),
                    )
                    .await
                {
                    warn!("Failed to mark rejected report {}: {}", report_id, e);
                }
                return Ok(AdmitOutcome::Rejected {
                    queue_capacity: capacity,
                });
            }
        }

        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        info!(
            "Admitted {} violation on {} as report {}",
            event.severity.as_str(),
            event.device_id,
            report_id
        );
        self.events.notify(&PipelineEvent::ViolationAdmitted {
            report_id: report_id.clone(),
            device_id: event.device_id,
            severity: event.severity,
            summary: event.summary,
            person_count: event.person_count,
            violation_count: event.violation_count,
            admitted_at: now,
        });
        Ok(AdmitOutcome::Admitted { report_id })
    }
}

#[async_trait]
impl FrameHandler for PipelineOrchestrator {
    async fn on_frame(&self, frame: Frame, detections: Vec<Detection>) {
        self.counters.frames_analyzed.fetch_add(1, Ordering::Relaxed);

        let verdict = self.rule.evaluate(&detections);
        if !verdict.has_violation {
            return;
        }
        self.counters
            .violations_detected
            .fetch_add(1, Ordering::Relaxed);

        let event = ViolationEvent {
            device_id: frame.device_id.clone(),
            timestamp: frame.captured_at,
            detections,
            person_count: verdict.person_count,
            violation_count: verdict.violation_count,
            severity: verdict.severity,
            summary: verdict.summary,
        };
        if let Err(e) = self.admit(event, Some(frame)).await {
            error!("Failed to admit detected violation: {}", e);
            *lock(&self.last_error) = Some(e.to_string());
        }
    }
}

/// Millisecond timestamp, a device hash prefix and a random suffix. Unique
/// and roughly sortable by admission time.
fn make_report_id(device_id: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let digest = Sha256::digest(device_id.as_bytes());
    let device_hash: String = digest
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect();
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", millis, device_hash, &uuid[..8])
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_id_shape() {
        let id = make_report_id("cam1");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_report_id_device_hash_is_stable() {
        let a = make_report_id("cam1");
        let b = make_report_id("cam1");
        let c = make_report_id("cam2");
        let hash = |id: &str| id.split('-').nth(1).unwrap().to_string();
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(hash(&a), hash(&c));
    }

    #[test]
    fn test_report_ids_are_unique() {
        let a = make_report_id("cam1");
        let b = make_report_id("cam1");
        assert_ne!(a, b);
    }
}
