//! Types for the violation queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

use crate::detect::{Frame, Severity, ViolationEvent};

/// Queue priority tier, derived from violation severity.
///
/// `Critical` is dequeued first. Retries demote one tier, flooring at `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Rank used for ordering: 0 is most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// One tier less urgent, flooring at `Low`.
    pub fn demoted(&self) -> Priority {
        match self {
            Priority::Critical => Priority::High,
            Priority::High => Priority::Medium,
            Priority::Medium => Priority::Low,
            Priority::Low => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Priority::Critical,
            Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Low => Priority::Low,
        }
    }
}

/// A violation admitted into the pipeline, waiting for enrichment.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// Unique report identifier, assigned once at admission.
    pub report_id: String,
    /// Device the violation was observed on.
    pub device_id: String,
    pub priority: Priority,
    /// Admission (or re-admission) time; FIFO key within a priority tier.
    pub enqueued_at: DateTime<Utc>,
    /// Tie-break for jobs admitted at the same instant. Assigned by the queue.
    pub(crate) seq: u64,
    /// Failed processing attempts so far.
    pub retry_count: u32,
    /// The raw violation payload.
    pub event: ViolationEvent,
    /// Captured frame for the snapshot step; absent for API submissions.
    pub frame: Option<Frame>,
}

impl QueuedJob {
    pub fn new(report_id: String, event: ViolationEvent, frame: Option<Frame>) -> Self {
        Self {
            report_id,
            device_id: event.device_id.clone(),
            priority: event.severity.into(),
            enqueued_at: Utc::now(),
            seq: 0,
            retry_count: 0,
            event,
            frame,
        }
    }
}

/// The one place ordering lives: priority first (most urgent wins), then
/// admission time FIFO, then the admission sequence as a deterministic
/// tie-break. `Less` means dequeued earlier.
pub(crate) fn job_order(a: &QueuedJob, b: &QueuedJob) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is at capacity; the enqueue is the backpressure signal.
    #[error("queue full: capacity {capacity}")]
    Full { capacity: usize },
}

/// Why a requeued job was permanently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    RetriesExhausted,
    QueueFull,
}

/// Outcome of a `requeue` call.
#[derive(Debug, Clone)]
pub enum RequeueOutcome {
    /// Re-enqueued at a demoted priority.
    Requeued { priority: Priority },
    /// Permanently dropped; the caller reports the terminal failure.
    Dropped { reason: DropReason },
}

/// Enqueue counts broken down by priority tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl PriorityCounts {
    pub(crate) fn bump(&mut self, priority: Priority) {
        match priority {
            Priority::Critical => self.critical += 1,
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}

/// Running queue statistics, maintained incrementally under the queue lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs accepted into the queue (first admission only).
    pub enqueued: u64,
    /// Jobs that completed enrichment.
    pub processed: u64,
    /// Jobs permanently dropped after exhausting retries.
    pub failed: u64,
    /// Retry re-admissions.
    pub retried: u64,
    /// Enqueue attempts rejected at capacity.
    pub rejected: u64,
    /// First admissions per device.
    pub per_device: HashMap<String, u64>,
    /// First admissions per priority tier.
    pub per_priority: PriorityCounts,
}

/// Point-in-time queue occupancy for status snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub size: usize,
    pub capacity: usize,
    pub stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Severity;

    fn event(device: &str, severity: Severity) -> ViolationEvent {
        ViolationEvent {
            device_id: device.to_string(),
            timestamp: Utc::now(),
            detections: vec![],
            person_count: 1,
            violation_count: 1,
            severity,
            summary: "test".to_string(),
        }
    }

    #[test]
    fn test_priority_demotion_floors_at_low() {
        assert_eq!(Priority::Critical.demoted(), Priority::High);
        assert_eq!(Priority::High.demoted(), Priority::Medium);
        assert_eq!(Priority::Medium.demoted(), Priority::Low);
        assert_eq!(Priority::Low.demoted(), Priority::Low);
    }

    #[test]
    fn test_job_order_priority_beats_time() {
        let mut early_low = QueuedJob::new("a".into(), event("cam1", Severity::Low), None);
        let mut late_critical = QueuedJob::new("b".into(), event("cam1", Severity::Critical), None);
        early_low.enqueued_at = Utc::now() - chrono::Duration::seconds(60);
        late_critical.enqueued_at = Utc::now();
        assert_eq!(job_order(&late_critical, &early_low), Ordering::Less);
    }

    #[test]
    fn test_job_order_fifo_within_tier() {
        let mut first = QueuedJob::new("a".into(), event("cam1", Severity::High), None);
        let mut second = QueuedJob::new("b".into(), event("cam1", Severity::High), None);
        first.enqueued_at = Utc::now() - chrono::Duration::seconds(1);
        second.enqueued_at = Utc::now();
        assert_eq!(job_order(&first, &second), Ordering::Less);
    }

    #[test]
    fn test_job_order_seq_breaks_ties() {
        let ts = Utc::now();
        let mut first = QueuedJob::new("a".into(), event("cam1", Severity::High), None);
        let mut second = QueuedJob::new("b".into(), event("cam1", Severity::High), None);
        first.enqueued_at = ts;
        second.enqueued_at = ts;
        first.seq = 1;
        second.seq = 2;
        assert_eq!(job_order(&first, &second), Ordering::Less);
    }

    #[test]
    fn test_priority_from_severity() {
        assert_eq!(Priority::from(Severity::Critical), Priority::Critical);
        assert_eq!(Priority::from(Severity::Low), Priority::Low);
    }
}
