//! Report query endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use helmwatch_core::enrich::{ReportFilter, ReportStatus};

use super::pipeline::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListReportsQuery {
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

const DEFAULT_LIST_LIMIT: usize = 100;

pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListReportsQuery>,
) -> Response {
    let status = match query.status.as_deref().map(ReportStatus::parse) {
        Some(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!(
                        "unknown status '{}'",
                        query.status.as_deref().unwrap_or_default()
                    ),
                }),
            )
                .into_response();
        }
        Some(Some(status)) => Some(status),
        None => None,
    };

    let mut filter = ReportFilter::new().with_limit(query.limit.unwrap_or(DEFAULT_LIST_LIMIT));
    if let Some(device_id) = &query.device_id {
        filter = filter.with_device(device_id);
    }
    if let Some(status) = status {
        filter = filter.with_status(status);
    }

    match state.reports().list(&filter).await {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => {
            tracing::error!("Failed to list reports: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to list reports".to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Response {
    match state.reports().get(&report_id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("report not found: {}", report_id),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch report {}: {}", report_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to fetch report".to_string(),
                }),
            )
                .into_response()
        }
    }
}
