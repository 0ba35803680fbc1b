//! Trait definitions for the enrichment collaborators.
//!
//! Each collaborator may fail or time out; the worker treats any of those as
//! a job failure subject to retry, never as a pipeline fault.

use async_trait::async_trait;
use thiserror::Error;

use crate::detect::{Detection, Frame, ViolationEvent};

use super::types::{NarrativeReport, ReportFilter, SnapshotRefs, ViolationReport};

/// Errors from the enrichment collaborators.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("snapshot store error: {0}")]
    Snapshot(String),

    #[error("caption service error: {0}")]
    Caption(String),

    #[error("narrative service error: {0}")]
    Narrative(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout {
        service: &'static str,
        timeout_ms: u64,
    },
}

/// Stores frame snapshots, returning opaque references.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn store(
        &self,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<SnapshotRefs, EnrichError>;
}

/// Produces a scene caption for a stored snapshot.
#[async_trait]
pub trait CaptionService: Send + Sync {
    async fn describe(&self, image_ref: &str) -> Result<String, EnrichError>;
}

/// Produces a structured narrative from a caption and the raw event.
/// Any retrieval-augmented context lookup is internal to the implementation.
#[async_trait]
pub trait NarrativeService: Send + Sync {
    async fn compose(
        &self,
        caption: &str,
        event: &ViolationEvent,
    ) -> Result<NarrativeReport, EnrichError>;
}

/// Upserts report metadata and final artifacts, keyed by `report_id`.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Insert or replace a report row.
    async fn upsert(&self, report: &ViolationReport) -> Result<(), EnrichError>;

    /// Transition a report's status, optionally recording a failure cause.
    async fn set_status(
        &self,
        report_id: &str,
        status: super::types::ReportStatus,
        error: Option<&str>,
    ) -> Result<(), EnrichError>;

    async fn get(&self, report_id: &str) -> Result<Option<ViolationReport>, EnrichError>;

    async fn list(&self, filter: &ReportFilter) -> Result<Vec<ViolationReport>, EnrichError>;
}
