use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, middleware::metrics_middleware, pipeline, reports};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Config
        .route("/config", get(handlers::get_config))
        // Pipeline lifecycle
        .route("/pipeline/start", post(pipeline::start))
        .route("/pipeline/pause", post(pipeline::pause))
        .route("/pipeline/resume", post(pipeline::resume))
        .route("/pipeline/stop", post(pipeline::stop))
        .route("/status", get(pipeline::status))
        // Ingest
        .route("/violations", post(pipeline::submit_violation))
        .route("/frames", post(pipeline::ingest_frame))
        // Reports
        .route("/reports", get(reports::list_reports))
        .route("/reports/{id}", get(reports::get_report));

    Router::new()
        .nest("/api", api_routes)
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::get_metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
