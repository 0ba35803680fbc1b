//! Default PPE violation rule.

use serde::{Deserialize, Serialize};

use super::traits::ViolationRule;
use super::types::{Detection, Severity, Verdict};

/// Configuration for the PPE rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpeRuleConfig {
    /// Labels that mark missing protective equipment.
    #[serde(default = "default_violation_labels")]
    pub violation_labels: Vec<String>,

    /// Label counted as a person.
    #[serde(default = "default_person_label")]
    pub person_label: String,

    /// Detections below this confidence are ignored.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_violation_labels() -> Vec<String> {
    vec!["no_helmet".to_string(), "no_vest".to_string()]
}

fn default_person_label() -> String {
    "person".to_string()
}

fn default_min_confidence() -> f32 {
    0.5
}

impl Default for PpeRuleConfig {
    fn default() -> Self {
        Self {
            violation_labels: default_violation_labels(),
            person_label: default_person_label(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Flags frames where people are missing required protective equipment.
///
/// Severity scales with the share of people affected: every person uncovered
/// is critical, half or more is high, a quarter or more is medium, anything
/// else is low.
pub struct PpeRule {
    config: PpeRuleConfig,
}

impl PpeRule {
    pub fn new(config: PpeRuleConfig) -> Self {
        Self { config }
    }

    fn severity_for(person_count: usize, violation_count: usize) -> Severity {
        if person_count == 0 {
            // Equipment flagged without a person box; the detector saw
            // something, keep it at medium.
            return Severity::Medium;
        }
        let ratio = violation_count as f32 / person_count as f32;
        if ratio >= 1.0 {
            Severity::Critical
        } else if ratio >= 0.5 {
            Severity::High
        } else if ratio >= 0.25 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl Default for PpeRule {
    fn default() -> Self {
        Self::new(PpeRuleConfig::default())
    }
}

impl ViolationRule for PpeRule {
    fn evaluate(&self, detections: &[Detection]) -> Verdict {
        let confident = detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence);

        let mut person_count = 0;
        let mut violation_count = 0;
        for detection in confident {
            if detection.label == self.config.person_label {
                person_count += 1;
            } else if self.config.violation_labels.contains(&detection.label) {
                violation_count += 1;
            }
        }

        if violation_count == 0 {
            return Verdict {
                person_count,
                ..Verdict::clean()
            };
        }

        Verdict {
            has_violation: true,
            severity: Self::severity_for(person_count, violation_count),
            summary: format!(
                "{} of {} people missing protective equipment",
                violation_count.min(person_count.max(violation_count)),
                person_count.max(violation_count)
            ),
            person_count,
            violation_count,
        }
    }
}
