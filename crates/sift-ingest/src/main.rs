//! `sift-ingestd`: hosts the ingestion service and its maintenance sweeper.

use anyhow::Context;
use sift_core::{IngestConfig, QuotaStore};
use sift_db::{setup_database, InMemoryQuotaStore, PgQuotaRepository};
use sift_infra::{init_telemetry, shutdown_telemetry};
use sift_ingest::{Collaborators, IngestService};
use sift_processing::ExifStripper;
use sift_services::ClamAVService;
use sift_storage::LocalStorage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IngestConfig::from_env()?;
    init_telemetry(config.log_json)
        .map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {}", e))?;
    config.validate()?;

    let scanner = Arc::new(ClamAVService::new(
        config.clamav_host.clone(),
        config.clamav_port,
    ));
    match scanner.ping().await {
        Ok(()) => tracing::info!(
            host = %config.clamav_host,
            port = config.clamav_port,
            "ClamAV reachable"
        ),
        // Scans fail closed, so uploads will fail until the daemon is up
        Err(e) => tracing::warn!(
            host = %config.clamav_host,
            port = config.clamav_port,
            error = %e,
            "ClamAV not reachable at startup"
        ),
    }

    let quota_store: Arc<dyn QuotaStore> = match &config.database_url {
        Some(url) => Arc::new(PgQuotaRepository::new(setup_database(url).await?)),
        None => {
            tracing::warn!("DATABASE_URL not set, quota usage is kept in memory");
            Arc::new(InMemoryQuotaStore::new())
        }
    };

    let storage = LocalStorage::new(&config.storage_dir, &config.quarantine_dir)
        .await
        .context("Failed to initialise storage")?;

    let service = IngestService::new(
        config,
        Collaborators {
            scanner,
            stripper: Arc::new(ExifStripper::new()),
            quota_store,
            storage: Arc::new(storage),
        },
    )
    .await?;

    let shutdown = CancellationToken::new();
    let sweeper = service.start_sweeper(shutdown.clone());
    tracing::info!("sift-ingestd running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task ended abnormally");
    }
    service.shutdown().await;
    shutdown_telemetry().await;

    Ok(())
}
