use common::init_tracing;
use corelib::{Environment, IngestConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match IngestConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(matches!(config.environment, Environment::Prod));
    tracing::info!(environment = ?config.environment, db_path = %config.db_path, "starting ingest service");

    let service = match ingest::bootstrap_default(config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize ingest service");
            std::process::exit(3);
        }
    };

    tracing::info!("ingest service started, waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping");

    let stats = service.stats().await?;
    tracing::info!(cache_entries = stats.cache.total_entries, "final cache stats");

    Ok(())
}
