//! Types for the detection module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a detected violation.
///
/// Ordinal: `Critical` is the most urgent. Drives queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Rank used for ordering: 0 is most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A single object detection from the vision model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Class label (e.g., "person", "no_helmet", "no_vest").
    pub label: String,
    /// Detection confidence, 0.0 to 1.0.
    pub confidence: f32,
    /// Location in the frame.
    pub bbox: BoundingBox,
}

/// A captured video frame with its raw image payload.
///
/// The payload is opaque to the core; only the snapshot store interprets it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Device the frame was captured from.
    pub device_id: String,
    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
    /// Encoded image bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A raw violation event produced by the violation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEvent {
    /// Device that observed the violation.
    pub device_id: String,
    /// When the violating frame was captured.
    pub timestamp: DateTime<Utc>,
    /// Detections in the violating frame.
    pub detections: Vec<Detection>,
    /// People visible in the frame.
    pub person_count: usize,
    /// Missing-equipment detections in the frame.
    pub violation_count: usize,
    /// Severity classification.
    pub severity: Severity,
    /// Short human-readable summary of the violation.
    pub summary: String,
}

/// Outcome of running the violation rule over a frame's detections.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub has_violation: bool,
    pub severity: Severity,
    pub summary: String,
    pub person_count: usize,
    pub violation_count: usize,
}

impl Verdict {
    /// A verdict for a frame with nothing to report.
    pub fn clean() -> Self {
        Self {
            has_violation: false,
            severity: Severity::Low,
            summary: String::new(),
            person_count: 0,
            violation_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_rank_order() {
        assert!(Severity::Critical.rank() < Severity::High.rank());
        assert!(Severity::High.rank() < Severity::Medium.rank());
        assert!(Severity::Medium.rank() < Severity::Low.rank());
    }

    #[test]
    fn test_severity_serde_snake_case() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(parsed, Severity::Critical);
    }

    #[test]
    fn test_violation_event_serialization() {
        let event = ViolationEvent {
            device_id: "cam1".to_string(),
            timestamp: Utc::now(),
            detections: vec![Detection {
                label: "no_helmet".to_string(),
                confidence: 0.92,
                bbox: BoundingBox {
                    x: 10.0,
                    y: 20.0,
                    width: 50.0,
                    height: 80.0,
                },
            }],
            person_count: 1,
            violation_count: 1,
            severity: Severity::High,
            summary: "1 of 1 people missing protective equipment".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: ViolationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.device_id, "cam1");
        assert_eq!(parsed.severity, Severity::High);
        assert_eq!(parsed.detections.len(), 1);
    }
}
