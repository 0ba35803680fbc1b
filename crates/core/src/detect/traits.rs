//! Trait definitions for the detection module.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::token::ControlToken;
use super::types::{Detection, Frame, Verdict};

/// Errors from a detection source.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The underlying capture device or stream failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The inference backend failed.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Receiver for per-frame detections.
///
/// The orchestrator implements this; the detection source invokes it once per
/// analyzed frame, on the source's own task.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, frame: Frame, detections: Vec<Detection>);
}

/// A continuous source of `(frame, detections)` pairs.
///
/// `run` drives frames through the handler until the token is stopped,
/// checking the token at each iteration boundary. While the token is
/// suspended, inference pauses; capture may continue inside the source.
#[async_trait]
pub trait DetectionSource: Send + Sync {
    /// Name of this source implementation.
    fn name(&self) -> &str;

    /// Run the detection loop. Returns when the token is stopped or the
    /// source is exhausted.
    async fn run(
        &self,
        handler: Arc<dyn FrameHandler>,
        token: ControlToken,
    ) -> Result<(), DetectError>;
}

/// Pure rule deciding whether a frame's detections constitute a violation.
pub trait ViolationRule: Send + Sync {
    fn evaluate(&self, detections: &[Detection]) -> Verdict;
}
