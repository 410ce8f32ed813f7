use anyhow::{Context, Result};
use photo_archiver::config::Config;
use photo_archiver::kafka_consumer::NotificationConsumer;
use photo_archiver::processor::EventProcessor;
use photo_archiver::replication::{ReplicationSink, SecretsBackedConnector};
use photo_archiver::secrets::SecretsManagerStore;
use photo_archiver::storage::S3ObjectStorage;
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
        source_prefix = %config.archive.source_prefix,
        destination_prefix = %config.archive.destination_prefix,
        key_policy = ?config.archive.key_policy,
        "Starting Photo Archiver"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let storage = Arc::new(
        S3ObjectStorage::new(&config.aws, config.confirm_timeout())
            .await
            .context("Failed to initialize S3 storage")?,
    );

    let replication = if config.replica.enabled {
        if config.replica.bucket.is_empty() {
            anyhow::bail!("replica.bucket must be set when replication is enabled");
        }
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws.region.clone()))
            .load()
            .await;
        let secrets = Arc::new(SecretsManagerStore::new(&sdk_config));
        let connector = Arc::new(SecretsBackedConnector::new(secrets, config.replica.clone()));

        info!(bucket = %config.replica.bucket, "Replication enabled");
        Some(Arc::new(ReplicationSink::new(
            connector,
            config.replica.bucket.as_str(),
        )))
    } else {
        None
    };

    let processor = Arc::new(EventProcessor::from_config(&config, storage, replication));

    let consumer = NotificationConsumer::new(&config.kafka, processor)
        .context("Failed to initialize Kafka consumer")?;

    // Spawn Kafka consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    info!("Photo archiver started successfully");

    shutdown_signal().await;

    info!("Shutting down photo archiver");
    consumer_handle.abort();
    info!("Photo archiver stopped");

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
    metrics_exporter_prometheus::PrometheusBuilder::new()
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
