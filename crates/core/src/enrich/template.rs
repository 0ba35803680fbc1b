//! Offline fallback collaborators.
//!
//! Used when no caption or narrative endpoint is configured: reports are
//! still produced end to end, with text composed from the detection data
//! instead of an external model.

use async_trait::async_trait;

use crate::detect::ViolationEvent;

use super::traits::{CaptionService, EnrichError, NarrativeService};
use super::types::NarrativeReport;

/// Caption service that labels the snapshot without describing the scene.
pub struct TemplateCaptionService;

#[async_trait]
impl CaptionService for TemplateCaptionService {
    async fn describe(&self, image_ref: &str) -> Result<String, EnrichError> {
        Ok(format!("Captured frame ({})", image_ref))
    }
}

/// Narrative service composing a fixed-form report from the event data.
pub struct TemplateNarrativeService;

#[async_trait]
impl NarrativeService for TemplateNarrativeService {
    async fn compose(
        &self,
        caption: &str,
        event: &ViolationEvent,
    ) -> Result<NarrativeReport, EnrichError> {
        let labels: Vec<&str> = event
            .detections
            .iter()
            .map(|d| d.label.as_str())
            .collect();
        let body = if labels.is_empty() {
            format!(
                "{} On device {}, {} of {} detected people were missing \
                 required protective equipment.",
                caption, event.device_id, event.violation_count, event.person_count
            )
        } else {
            format!(
                "{} On device {}, {} of {} detected people were missing \
                 required protective equipment (detections: {}).",
                caption,
                event.device_id,
                event.violation_count,
                event.person_count,
                labels.join(", ")
            )
        };
        Ok(NarrativeReport {
            title: format!(
                "{} PPE violation on {}",
                capitalize(event.severity.as_str()),
                event.device_id
            ),
            body,
            recommendations: vec![
                "Verify required protective equipment at the affected station".to_string(),
                "Review the attached snapshot before escalating".to_string(),
            ],
        })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
