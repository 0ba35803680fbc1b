mod api;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use helmwatch_core::{
    detect::{channel_source, DetectionSource, PpeRule, PpeRuleConfig, ViolationRule},
    enrich::{
        CaptionService, FsSnapshotStore, HttpCaptionService, HttpNarrativeService,
        NarrativeService, PersistenceService, SnapshotStore, TemplateCaptionService,
        TemplateNarrativeService,
    },
    load_config, validate_config,
    report::SqliteReportStore,
    worker::EnrichmentServices,
    PipelineOrchestrator,
};

use api::create_router;
use state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("HELMWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Snapshot directory: {:?}", config.snapshots.dir);

    // Report store
    let reports: Arc<dyn PersistenceService> = Arc::new(
        SqliteReportStore::new(&config.database.path)
            .context("Failed to create report store")?,
    );
    info!("Report store initialized");

    // Snapshot store
    let snapshots: Arc<dyn SnapshotStore> =
        Arc::new(FsSnapshotStore::new(config.snapshots.dir.clone()));

    // Caption and narrative services, with offline fallbacks
    let captions: Arc<dyn CaptionService> = match &config.caption {
        Some(service_config) => {
            info!("Using caption service at {}", service_config.url);
            Arc::new(HttpCaptionService::new(service_config.clone()))
        }
        None => {
            info!("No caption service configured, using template captions");
            Arc::new(TemplateCaptionService)
        }
    };
    let narratives: Arc<dyn NarrativeService> = match &config.narrative {
        Some(service_config) => {
            info!("Using narrative service at {}", service_config.url);
            Arc::new(HttpNarrativeService::new(service_config.clone()))
        }
        None => {
            info!("No narrative service configured, using template narratives");
            Arc::new(TemplateNarrativeService)
        }
    };

    // Detection source: frames arrive over the ingest API
    let (source, frames) = channel_source(256);
    let rule: Arc<dyn ViolationRule> = Arc::new(PpeRule::new(PpeRuleConfig::default()));

    let orchestrator = PipelineOrchestrator::new(
        config.pipeline.clone(),
        Arc::new(source) as Arc<dyn DetectionSource>,
        rule,
        EnrichmentServices {
            snapshots,
            captions,
            narratives,
            persistence: Arc::clone(&reports),
        },
    );
    orchestrator.register_handler(Box::new(|event: &helmwatch_core::event::PipelineEvent| {
        metrics::record_event(event);
        Ok(())
    }));
    info!("Pipeline orchestrator initialized (idle until /api/pipeline/start)");

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        reports,
        frames,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop the pipeline: terminates the source and drains the workers
    info!("Server shutting down...");
    orchestrator
        .stop()
        .await
        .context("Failed to stop pipeline")?;
    info!("Pipeline stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
