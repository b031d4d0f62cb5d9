mod catalog;
mod config;
mod consumer;
mod error;
mod extractor;
mod orchestrator;
mod prefix;
mod status;
mod usage;

use anyhow::{Context, Result};
use catalog::{ObjectCatalog, VideoLister};
use config::Config;
use consumer::JobKafkaConsumer;
use extractor::{FfmpegFrameExtractor, FrameExtractor};
use orchestrator::JobOrchestrator;
use status::{PgStatusStore, StatusStore};
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
        "Starting extraction orchestrator"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let status_store = Arc::new(
        PgStatusStore::new(&config.database)
            .await
            .context("Failed to initialize status store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        status_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let catalog = Arc::new(
        ObjectCatalog::new(&config.s3)
            .await
            .context("Failed to initialize object catalog")?,
    );

    let ffmpeg_extractor = Arc::new(FfmpegFrameExtractor::new(
        Arc::clone(&catalog),
        &config.extraction,
    ));

    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::clone(&catalog) as Arc<dyn VideoLister>,
        ffmpeg_extractor as Arc<dyn FrameExtractor>,
        Arc::clone(&status_store) as Arc<dyn StatusStore>,
        config.extraction.sample_interval_secs,
    ));

    // Create Kafka consumer
    let kafka_consumer = JobKafkaConsumer::new(&config.kafka, orchestrator)
        .await
        .context("Failed to initialize Kafka consumer")?;

    // Spawn Kafka consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = kafka_consumer.run().await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    info!("Extraction orchestrator started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down extraction orchestrator");

    // A job interrupted here keeps its offset uncommitted and is
    // redelivered to another worker in the group.
    consumer_handle.abort();

    info!("Extraction orchestrator stopped");

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
