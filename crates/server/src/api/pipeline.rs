//! Pipeline control and ingest endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use helmwatch_core::{
    admission::Suppression,
    detect::{Detection, Frame, Severity, ViolationEvent},
    AdmitOutcome, OrchestratorError, StatusSnapshot,
};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: String,
}

fn orchestrator_error(e: OrchestratorError) -> Response {
    let status = match e {
        OrchestratorError::InvalidTransition { .. } | OrchestratorError::NotAccepting { .. } => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

fn state_response(state: &Arc<AppState>) -> Response {
    Json(StateResponse {
        state: state.orchestrator().state().as_str().to_string(),
    })
    .into_response()
}

pub async fn start(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator().start().await {
        Ok(()) => state_response(&state),
        Err(e) => orchestrator_error(e),
    }
}

pub async fn pause(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator().pause().await {
        Ok(()) => state_response(&state),
        Err(e) => orchestrator_error(e),
    }
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator().resume().await {
        Ok(()) => state_response(&state),
        Err(e) => orchestrator_error(e),
    }
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator().stop().await {
        Ok(()) => state_response(&state),
        Err(e) => orchestrator_error(e),
    }
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.orchestrator().status().await)
}

/// Externally detected violation, admitted through the same gate as
/// frame-path detections.
#[derive(Debug, Deserialize)]
pub struct SubmitViolationRequest {
    pub device_id: String,
    /// Defaults to the server's current time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    pub person_count: usize,
    pub violation_count: usize,
    pub severity: Severity,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitViolationResponse {
    pub report_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuppressedResponse {
    pub suppressed: Suppression,
}

pub async fn submit_violation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitViolationRequest>,
) -> Response {
    let summary = request.summary.unwrap_or_else(|| {
        format!(
            "{} of {} people missing protective equipment",
            request.violation_count, request.person_count
        )
    });
    let event = ViolationEvent {
        device_id: request.device_id,
        timestamp: request.timestamp.unwrap_or_else(Utc::now),
        detections: request.detections,
        person_count: request.person_count,
        violation_count: request.violation_count,
        severity: request.severity,
        summary,
    };

    match state.orchestrator().submit(event).await {
        Ok(AdmitOutcome::Admitted { report_id }) => {
            (StatusCode::ACCEPTED, Json(SubmitViolationResponse { report_id }))
                .into_response()
        }
        Ok(AdmitOutcome::Suppressed(suppressed)) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(SuppressedResponse { suppressed }),
        )
            .into_response(),
        Ok(AdmitOutcome::Rejected { queue_capacity }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: format!("queue at capacity ({})", queue_capacity),
            }),
        )
            .into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// Frame with detections from an inference sidecar, pushed into the
/// detection source for rule evaluation.
#[derive(Debug, Deserialize)]
pub struct IngestFrameRequest {
    pub device_id: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    pub detections: Vec<Detection>,
    /// Raw image bytes; optional, the snapshot is skipped without them.
    #[serde(default)]
    pub image: Vec<u8>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct IngestFrameResponse {
    pub accepted: bool,
}

pub async fn ingest_frame(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestFrameRequest>,
) -> Response {
    let frame = Frame {
        device_id: request.device_id,
        captured_at: request.captured_at.unwrap_or_else(Utc::now),
        data: request.image,
        width: request.width,
        height: request.height,
    };
    let accepted = state.frames().push(frame, request.detections);
    let status = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(IngestFrameResponse { accepted })).into_response()
}
