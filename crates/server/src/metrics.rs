//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the helmwatch server:
//! - HTTP request metrics (latency, counts, in-flight)
//! - Pipeline event counters (fed by an event handler)
//! - Queue and worker status (collected dynamically at scrape time)

use once_cell::sync::Lazy;
use prometheus::{
    self, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};

use helmwatch_core::event::PipelineEvent;
use helmwatch_core::StatusSnapshot;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "helmwatch_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("helmwatch_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Pipeline Event Metrics (fed by the registered event handler)
// =============================================================================

/// Pipeline events by type.
pub static PIPELINE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("helmwatch_pipeline_events_total", "Pipeline events by type"),
        &["type"],
    )
    .unwrap()
});

/// Admitted violations by severity.
pub static VIOLATIONS_ADMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "helmwatch_violations_admitted_total",
            "Admitted violations by severity",
        ),
        &["severity"],
    )
    .unwrap()
});

// =============================================================================
// Pipeline Status Metrics (collected dynamically at scrape time)
// =============================================================================

/// Pipeline running state (1 = detecting, 0 = anything else).
pub static PIPELINE_DETECTING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_pipeline_detecting",
        "Whether the pipeline is detecting (1) or not (0)",
    )
    .unwrap()
});

/// Current queue depth.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("helmwatch_queue_depth", "Jobs waiting in the violation queue").unwrap()
});

/// Jobs currently held by workers.
pub static WORKERS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_workers_in_flight",
        "Jobs currently being enriched by workers",
    )
    .unwrap()
});

/// Frames analyzed since startup.
pub static FRAMES_ANALYZED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_frames_analyzed_total",
        "Frames analyzed since startup",
    )
    .unwrap()
});

/// Reports completed since startup.
pub static REPORTS_PROCESSED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_reports_processed_total",
        "Reports completed since startup",
    )
    .unwrap()
});

/// Jobs permanently dropped since startup.
pub static REPORTS_FAILED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_reports_failed_total",
        "Jobs permanently dropped since startup",
    )
    .unwrap()
});

/// Enqueue attempts rejected at capacity since startup.
pub static QUEUE_REJECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helmwatch_queue_rejected_total",
        "Enqueue attempts rejected at capacity since startup",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(PIPELINE_EVENTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(VIOLATIONS_ADMITTED_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(PIPELINE_DETECTING.clone()))
        .unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
    registry
        .register(Box::new(WORKERS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(FRAMES_ANALYZED.clone()))
        .unwrap();
    registry
        .register(Box::new(REPORTS_PROCESSED.clone()))
        .unwrap();
    registry
        .register(Box::new(REPORTS_FAILED.clone()))
        .unwrap();
    registry
        .register(Box::new(QUEUE_REJECTED.clone()))
        .unwrap();
}

/// Count a pipeline event. Registered as an event handler on the
/// orchestrator during startup.
pub fn record_event(event: &PipelineEvent) {
    PIPELINE_EVENTS_TOTAL
        .with_label_values(&[event.kind()])
        .inc();
    if let PipelineEvent::ViolationAdmitted { severity, .. } = event {
        VIOLATIONS_ADMITTED_TOTAL
            .with_label_values(&[severity.as_str()])
            .inc();
    }
}

/// Refresh the dynamically collected gauges from a status snapshot.
/// Called on each `/metrics` scrape.
pub fn update_from_status(status: &StatusSnapshot) {
    PIPELINE_DETECTING.set(
        (status.state == helmwatch_core::PipelineState::Detecting) as i64,
    );
    QUEUE_DEPTH.set(status.queue.size as i64);
    WORKERS_IN_FLIGHT.set(status.workers.in_flight as i64);
    FRAMES_ANALYZED.set(status.counters.frames_analyzed as i64);
    REPORTS_PROCESSED.set(status.queue.stats.processed as i64);
    REPORTS_FAILED.set(status.queue.stats.failed as i64);
    QUEUE_REJECTED.set(status.queue.stats.rejected as i64);
}

/// Collapse path parameters so metrics cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/api/reports/") {
        if !rest.is_empty() {
            return "/api/reports/{id}".to_string();
        }
    }
    path.to_string()
}
