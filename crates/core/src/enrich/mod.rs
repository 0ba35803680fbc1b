//! Enrichment module: the collaborator contracts a job passes through
//! (snapshot → caption → narrative → persistence) and concrete bindings.

mod fs_snapshots;
mod http;
mod template;
mod traits;
mod types;

pub use fs_snapshots::FsSnapshotStore;
pub use http::{HttpCaptionService, HttpNarrativeService, HttpServiceConfig};
pub use template::{TemplateCaptionService, TemplateNarrativeService};
pub use traits::{
    CaptionService, EnrichError, NarrativeService, PersistenceService, SnapshotStore,
};
pub use types::{
    NarrativeReport, ReportFilter, ReportStatus, SnapshotRefs, ViolationReport,
};
