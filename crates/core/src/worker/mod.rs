//! Worker pool draining the violation queue.
//!
//! Each worker runs the enrichment sequence for one job at a time:
//! snapshot, caption, narrative, persist. Every collaborator call is
//! individually bounded by a timeout. A failed attempt is requeued at a
//! demoted priority until retries are exhausted, at which point the report
//! transitions to `Failed` and the job is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::enrich::{
    CaptionService, EnrichError, NarrativeService, PersistenceService, ReportStatus,
    SnapshotRefs, SnapshotStore, ViolationReport,
};
use crate::event::{EventHub, PipelineEvent};
use crate::queue::{DropReason, QueuedJob, RequeueOutcome, ViolationQueue};

/// The enrichment collaborators a worker calls, injected at construction.
#[derive(Clone)]
pub struct EnrichmentServices {
    pub snapshots: Arc<dyn SnapshotStore>,
    pub captions: Arc<dyn CaptionService>,
    pub narratives: Arc<dyn NarrativeService>,
    pub persistence: Arc<dyn PersistenceService>,
}

/// Worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum jobs a worker drains from the queue in one pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long a worker blocks waiting for a job before re-checking shutdown.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// Per-call timeout for each enrichment collaborator.
    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    4
}

fn default_dequeue_timeout_ms() -> u64 {
    500
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            service_timeout_ms: default_service_timeout_ms(),
        }
    }
}

/// Running worker counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub jobs_processed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_retried: AtomicU64,
    pub in_flight: AtomicU64,
}

/// Point-in-time view of [`PoolStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub in_flight: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Pool of worker tasks draining the queue.
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<ViolationQueue>,
    services: EnrichmentServices,
    events: Arc<EventHub>,
    stats: Arc<PoolStats>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<ViolationQueue>,
        services: EnrichmentServices,
        events: Arc<EventHub>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            queue,
            services,
            events,
            stats: Arc::new(PoolStats::default()),
            shutdown_tx,
            shutting_down: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> &Arc<PoolStats> {
        &self.stats
    }

    /// Spawn the worker tasks. Idempotent only in the sense that calling it
    /// twice spawns a second set; callers gate it on pipeline state.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.workers.max(1) {
            let ctx = WorkerContext {
                worker_id,
                queue: Arc::clone(&self.queue),
                services: self.services.clone(),
                events: Arc::clone(&self.events),
                stats: Arc::clone(&self.stats),
                shutting_down: Arc::clone(&self.shutting_down),
                batch_size: self.config.batch_size.max(1),
                dequeue_timeout: Duration::from_millis(self.config.dequeue_timeout_ms),
                service_timeout: Duration::from_millis(self.config.service_timeout_ms),
            };
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                debug!("Worker {} started", ctx.worker_id);
                loop {
                    if ctx.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        batch = ctx.queue.dequeue_batch(ctx.batch_size, ctx.dequeue_timeout) => {
                            for job in batch {
                                if ctx.shutting_down.load(Ordering::SeqCst) {
                                    debug!(
                                        "Worker {} leaving report {} pending for shutdown",
                                        ctx.worker_id, job.report_id
                                    );
                                    continue;
                                }
                                ctx.run_job(job).await;
                            }
                        }
                    }
                }
                debug!("Worker {} stopped", ctx.worker_id);
            }));
        }
        info!("Started {} workers", self.config.workers.max(1));
    }

    /// Signal all workers and wait for them to finish their current job.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker task join failed: {}", e);
            }
        }
        info!("Worker pool shut down");
    }
}

struct WorkerContext {
    worker_id: usize,
    queue: Arc<ViolationQueue>,
    services: EnrichmentServices,
    events: Arc<EventHub>,
    stats: Arc<PoolStats>,
    shutting_down: Arc<AtomicBool>,
    batch_size: usize,
    dequeue_timeout: Duration,
    service_timeout: Duration,
}

/// How a single enrichment attempt ended short of an error.
enum Enrichment {
    Completed,
    Abandoned,
}

impl WorkerContext {
    async fn run_job(&self, job: QueuedJob) {
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        let outcome = self.enrich(&job).await;
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(Enrichment::Abandoned) => {
                debug!(
                    "Worker {} abandoning report {} mid-enrichment for shutdown",
                    self.worker_id, job.report_id
                );
                if let Err(e) = self
                    .services
                    .persistence
                    .set_status(&job.report_id, ReportStatus::Pending, None)
                    .await
                {
                    warn!("Failed to reset report {} to pending: {}", job.report_id, e);
                }
            }
            Ok(Enrichment::Completed) => {
                self.stats.jobs_processed.fetch_add(1, Ordering::Relaxed);
                self.queue.mark_processed(&job).await;
                self.events.notify(&PipelineEvent::ReportReady {
                    report_id: job.report_id.clone(),
                    device_id: job.device_id.clone(),
                    priority: job.priority,
                    attempts: job.retry_count + 1,
                });
                info!(
                    "Worker {} completed report {} (attempt {})",
                    self.worker_id,
                    job.report_id,
                    job.retry_count + 1
                );
            }
            Err(e) => {
                warn!(
                    "Worker {} failed report {} (attempt {}): {}",
                    self.worker_id,
                    job.report_id,
                    job.retry_count + 1,
                    e
                );
                let report_id = job.report_id.clone();
                let message = e.to_string();
                match self.queue.requeue(job).await {
                    RequeueOutcome::Requeued { priority } => {
                        self.stats.jobs_retried.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Requeued report {} at priority {}",
                            report_id,
                            priority.as_str()
                        );
                    }
                    RequeueOutcome::Dropped { reason } => {
                        self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
                        let cause = match reason {
                            DropReason::RetriesExhausted => {
                                format!("retries exhausted: {}", message)
                            }
                            DropReason::QueueFull => {
                                format!("queue full on requeue: {}", message)
                            }
                        };
                        error!("Dropping report {}: {}", report_id, cause);
                        if let Err(e) = self
                            .services
                            .persistence
                            .set_status(&report_id, ReportStatus::Failed, Some(&cause))
                            .await
                        {
                            error!("Failed to mark report {} as failed: {}", report_id, e);
                        }
                        self.events.notify(&PipelineEvent::Error {
                            report_id: Some(report_id),
                            message: cause,
                            permanent: true,
                        });
                    }
                }
            }
        }
    }

    /// The enrichment sequence for one job. Any step failing fails the
    /// whole attempt; completed artifacts are only persisted at the end.
    /// Shutdown is cooperative: the in-flight collaborator call finishes,
    /// then the stop flag is consulted before the next step is taken.
    async fn enrich(&self, job: &QueuedJob) -> Result<Enrichment, EnrichError> {
        self.services
            .persistence
            .set_status(&job.report_id, ReportStatus::Generating, None)
            .await?;
        if self.stopping() {
            return Ok(Enrichment::Abandoned);
        }

        let snapshot = match &job.frame {
            Some(frame) => Some(
                self.bounded("snapshot store", self.services.snapshots.store(
                    frame,
                    &job.event.detections,
                ))
                .await?,
            ),
            None => None,
        };
        if self.stopping() {
            return Ok(Enrichment::Abandoned);
        }

        // API submissions carry no frame; the narrative falls back to the
        // detector summary in place of a scene caption.
        let caption = match &snapshot {
            Some(refs) => {
                self.bounded("caption service", self.services.captions.describe(&refs.original))
                    .await?
            }
            None => job.event.summary.clone(),
        };
        if self.stopping() {
            return Ok(Enrichment::Abandoned);
        }

        let narrative = self
            .bounded(
                "narrative service",
                self.services.narratives.compose(&caption, &job.event),
            )
            .await?;
        if self.stopping() {
            return Ok(Enrichment::Abandoned);
        }

        let report = completed_report(job, snapshot, caption, narrative);
        self.bounded("persistence", self.services.persistence.upsert(&report))
            .await?;
        Ok(Enrichment::Completed)
    }

    fn stopping(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn bounded<T>(
        &self,
        service: &'static str,
        fut: impl std::future::Future<Output = Result<T, EnrichError>>,
    ) -> Result<T, EnrichError> {
        match tokio::time::timeout(self.service_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EnrichError::Timeout {
                service,
                timeout_ms: self.service_timeout.as_millis() as u64,
            }),
        }
    }
}

fn completed_report(
    job: &QueuedJob,
    snapshot: Option<SnapshotRefs>,
    caption: String,
    narrative: crate::enrich::NarrativeReport,
) -> ViolationReport {
    let mut report = ViolationReport::pending(job.report_id.clone(), job.event.clone());
    report.status = ReportStatus::Completed;
    report.caption = Some(caption);
    report.narrative = Some(narrative);
    report.snapshot = snapshot;
    report.attempts = job.retry_count + 1;
    report
}
