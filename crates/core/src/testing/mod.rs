//! Mock implementations of the pipeline's external collaborators, used for
//! unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::detect::{
    ControlToken, DetectError, Detection, DetectionSource, Frame, FrameHandler,
};
use crate::enrich::{
    CaptionService, EnrichError, NarrativeReport, NarrativeService, PersistenceService,
    ReportFilter, ReportStatus, SnapshotRefs, SnapshotStore, ViolationReport,
};

/// Build a frame with a small fake JPEG payload.
pub fn test_frame(device_id: &str) -> Frame {
    Frame {
        device_id: device_id.to_string(),
        captured_at: Utc::now(),
        data: vec![0xff, 0xd8, 0xff, 0xe0],
        width: 640,
        height: 480,
    }
}

/// Build a detection with a unit bounding box.
pub fn test_detection(label: &str, confidence: f32) -> Detection {
    Detection {
        label: label.to_string(),
        confidence,
        bbox: crate::detect::BoundingBox {
            x: 0.1,
            y: 0.1,
            width: 0.2,
            height: 0.4,
        },
    }
}

/// Scripted detection source that pushes a fixed list of frames through the
/// handler, honoring pause and stop at each iteration boundary.
pub struct MockDetectionSource {
    frames: Mutex<Vec<(Frame, Vec<Detection>)>>,
    frames_delivered: AtomicUsize,
    /// When set, `run` keeps the task alive after the script is exhausted
    /// until the token is stopped.
    linger: bool,
}

impl MockDetectionSource {
    pub fn new(frames: Vec<(Frame, Vec<Detection>)>) -> Self {
        Self {
            frames: Mutex::new(frames),
            frames_delivered: AtomicUsize::new(0),
            linger: true,
        }
    }

    pub fn finite(frames: Vec<(Frame, Vec<Detection>)>) -> Self {
        Self {
            frames: Mutex::new(frames),
            frames_delivered: AtomicUsize::new(0),
            linger: false,
        }
    }

    pub fn frames_delivered(&self) -> usize {
        self.frames_delivered.load(Ordering::SeqCst)
    }

    fn next_frame(&self) -> Option<(Frame, Vec<Detection>)> {
        let mut frames = self.frames.lock().unwrap();
        if frames.is_empty() {
            None
        } else {
            Some(frames.remove(0))
        }
    }
}

#[async_trait]
impl DetectionSource for MockDetectionSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(
        &self,
        handler: Arc<dyn FrameHandler>,
        mut token: ControlToken,
    ) -> Result<(), DetectError> {
        loop {
            if !token.checkpoint().await {
                return Ok(());
            }
            match self.next_frame() {
                Some((frame, detections)) => {
                    handler.on_frame(frame, detections).await;
                    self.frames_delivered.fetch_add(1, Ordering::SeqCst);
                }
                None => {
                    if !self.linger {
                        return Ok(());
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
                        _ = token.changed() => {}
                    }
                }
            }
        }
    }
}

/// Snapshot store that fabricates references without touching disk.
pub struct MockSnapshotStore {
    stored: AtomicUsize,
    fail_remaining: Mutex<usize>,
}

impl MockSnapshotStore {
    pub fn new() -> Self {
        Self {
            stored: AtomicUsize::new(0),
            fail_remaining: Mutex::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        *self.fail_remaining.lock().unwrap() = n;
    }

    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }
}

impl Default for MockSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MockSnapshotStore {
    async fn store(
        &self,
        frame: &Frame,
        _detections: &[Detection],
    ) -> Result<SnapshotRefs, EnrichError> {
        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(EnrichError::Snapshot("mock snapshot failure".to_string()));
            }
        }
        let n = self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(SnapshotRefs {
            original: format!("mock://{}/{}.jpg", frame.device_id, n),
            annotated: None,
        })
    }
}

/// Caption service with scripted failures, optional latency and a call
/// counter.
pub struct MockCaptionService {
    calls: AtomicUsize,
    fail_remaining: Mutex<usize>,
    latency: Mutex<std::time::Duration>,
}

impl MockCaptionService {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_remaining: Mutex::new(0),
            latency: Mutex::new(std::time::Duration::ZERO),
        }
    }

    /// The next `n` calls fail with a caption error.
    pub fn fail_next(&self, n: usize) {
        *self.fail_remaining.lock().unwrap() = n;
    }

    /// Delay every call by `latency`, keeping the calling worker busy.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCaptionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptionService for MockCaptionService {
    async fn describe(&self, image_ref: &str) -> Result<String, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(EnrichError::Caption("mock caption failure".to_string()));
            }
        }
        Ok(format!("scene at {}", image_ref))
    }
}

/// Narrative service that composes a fixed-shape report from the caption.
pub struct MockNarrativeService {
    calls: AtomicUsize,
    fail_remaining: Mutex<usize>,
    latency: Mutex<std::time::Duration>,
}

impl MockNarrativeService {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_remaining: Mutex::new(0),
            latency: Mutex::new(std::time::Duration::ZERO),
        }
    }

    pub fn fail_next(&self, n: usize) {
        *self.fail_remaining.lock().unwrap() = n;
    }

    /// Delay every call by `latency`, keeping the calling worker busy.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockNarrativeService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NarrativeService for MockNarrativeService {
    async fn compose(
        &self,
        caption: &str,
        event: &crate::detect::ViolationEvent,
    ) -> Result<NarrativeReport, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(EnrichError::Narrative("mock narrative failure".to_string()));
            }
        }
        Ok(NarrativeReport {
            title: format!("{} violation on {}", event.severity.as_str(), event.device_id),
            body: caption.to_string(),
            recommendations: vec!["review safety procedures".to_string()],
        })
    }
}

/// In-memory persistence keyed by report id.
pub struct MockPersistence {
    reports: Mutex<HashMap<String, ViolationReport>>,
    fail_remaining: Mutex<usize>,
    latency: Mutex<std::time::Duration>,
}

impl MockPersistence {
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(HashMap::new()),
            fail_remaining: Mutex::new(0),
            latency: Mutex::new(std::time::Duration::ZERO),
        }
    }

    pub fn fail_next(&self, n: usize) {
        *self.fail_remaining.lock().unwrap() = n;
    }

    /// Delay every call by `latency`, mimicking a slow backing store.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_fail(&self) -> Result<(), EnrichError> {
        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining = remaining.saturating_sub(1);
            return Err(EnrichError::Persistence(
                "mock persistence failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceService for MockPersistence {
    async fn upsert(&self, report: &ViolationReport) -> Result<(), EnrichError> {
        self.delay().await;
        self.check_fail()?;
        self.reports
            .lock()
            .unwrap()
            .insert(report.report_id.clone(), report.clone());
        Ok(())
    }

    async fn set_status(
        &self,
        report_id: &str,
        status: ReportStatus,
        error: Option<&str>,
    ) -> Result<(), EnrichError> {
        self.delay().await;
        self.check_fail()?;
        let mut reports = self.reports.lock().unwrap();
        match reports.get_mut(report_id) {
            Some(report) => {
                report.status = status;
                report.error = error.map(|e| e.to_string());
                Ok(())
            }
            None => Err(EnrichError::Persistence(format!(
                "report not found: {}",
                report_id
            ))),
        }
    }

    async fn get(&self, report_id: &str) -> Result<Option<ViolationReport>, EnrichError> {
        self.delay().await;
        self.check_fail()?;
        Ok(self.reports.lock().unwrap().get(report_id).cloned())
    }

    async fn list(&self, filter: &ReportFilter) -> Result<Vec<ViolationReport>, EnrichError> {
        self.delay().await;
        self.check_fail()?;
        let reports = self.reports.lock().unwrap();
        let mut matched: Vec<ViolationReport> = reports
            .values()
            .filter(|r| {
                filter
                    .device_id
                    .as_ref()
                    .is_none_or(|d| &r.device_id == d)
                    && filter.status.is_none_or(|s| r.status == s)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
