use anyhow::{Context, Result};
use picloop::api::{start_api_server, AppState};
use picloop::blob_store::{BlobStore, S3BlobStore};
use picloop::config::Config;
use picloop::image_store::{ImageRecordStore, PgImageStore};
use picloop::intake::IntakeService;
use picloop::rotation::RotationEngine;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting picloop slideshow service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let image_store = Arc::new(
        PgImageStore::new(&config.database)
            .await
            .context("Failed to initialize image record store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        image_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let records: Arc<dyn ImageRecordStore> = image_store;
    let blobs: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(&config.s3).await);

    let engine = Arc::new(RotationEngine::new(records.clone(), blobs.clone()));
    let intake = Arc::new(IntakeService::new(
        records,
        blobs,
        config.intake.blob_prefix.clone(),
    ));

    // Create API state
    let state = AppState { engine, intake };

    // Spawn API server task
    let api_config = config.api.clone();
    let intake_config = config.intake.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config, &intake_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Slideshow service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down slideshow service");

    api_handle.abort();

    info!("Slideshow service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
