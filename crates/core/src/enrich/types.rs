//! Types for the enrichment module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detect::{Severity, ViolationEvent};

/// Opaque references to stored snapshot images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRefs {
    /// Reference to the original frame image.
    pub original: String,
    /// Reference to the annotated image, when the store produces one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated: Option<String>,
}

/// Structured narrative produced for a violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeReport {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

/// Lifecycle status of a persisted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Generating => "generating",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReportStatus::Pending),
            "generating" => Some(ReportStatus::Generating),
            "completed" => Some(ReportStatus::Completed),
            "failed" => Some(ReportStatus::Failed),
            _ => None,
        }
    }
}

/// A violation report as persisted, enriched incrementally as the job moves
/// through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationReport {
    pub report_id: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
    pub summary: String,
    pub status: ReportStatus,
    /// The raw event as admitted.
    pub event: ViolationEvent,
    /// Scene caption, present after enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Generated narrative, present after enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<NarrativeReport>,
    /// Stored snapshot references, present after enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotRefs>,
    /// Processing attempts consumed.
    pub attempts: u32,
    /// Failure cause for `Failed` reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ViolationReport {
    /// A freshly admitted report, before any enrichment.
    pub fn pending(report_id: String, event: ViolationEvent) -> Self {
        Self {
            report_id,
            device_id: event.device_id.clone(),
            created_at: event.timestamp,
            severity: event.severity,
            summary: event.summary.clone(),
            status: ReportStatus::Pending,
            event,
            caption: None,
            narrative: None,
            snapshot: None,
            attempts: 0,
            error: None,
        }
    }
}

/// Filter for report listing.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub device_id: Option<String>,
    pub status: Option<ReportStatus>,
    pub limit: Option<usize>,
}

impl ReportFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    pub fn with_status(mut self, status: ReportStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ViolationEvent {
        ViolationEvent {
            device_id: "cam1".to_string(),
            timestamp: Utc::now(),
            detections: vec![],
            person_count: 1,
            violation_count: 1,
            severity: Severity::High,
            summary: "test".to_string(),
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Generating,
            ReportStatus::Completed,
            ReportStatus::Failed,
        ] {
            assert_eq!(ReportStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReportStatus::parse("bogus"), None);
    }

    #[test]
    fn test_pending_report_from_event() {
        let report = ViolationReport::pending("r-1".to_string(), event());
        assert_eq!(report.report_id, "r-1");
        assert_eq!(report.device_id, "cam1");
        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.caption.is_none());
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn test_report_serialization_skips_empty() {
        let report = ViolationReport::pending("r-1".to_string(), event());
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("\"caption\""));
        assert!(json.contains("\"status\":\"pending\""));
    }
}
