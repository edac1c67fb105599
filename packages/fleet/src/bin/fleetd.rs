//! Fleet daemon
//!
//! Boots the engine and the fleet, then sweeps the container runtime into
//! the fleet's records every `sync_interval` until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use fleet::kernel::SimulatedRuntime;
use fleet::telemetry::init_tracing;
use fleet::{Config, Fleet};
use reactor::{Context, MemoryStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    tracing::info!("Starting fleet daemon");

    let storage = storage(&config).await?;
    let runtime = Arc::new(SimulatedRuntime::new());
    let sync_interval = config.sync_interval;

    let fleet = Fleet::new(config, storage, runtime).context("Failed to build fleet")?;
    fleet.start().await.context("Failed to start fleet")?;

    let system = Context::system();
    let mut ticker = tokio::time::interval(sync_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match fleet.synchronize(&system).await {
                    Ok(changed) => tracing::debug!(changed, "sync sweep finished"),
                    Err(e) => tracing::error!(error = %e, "sync sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    fleet.engine().stop();
    Ok(())
}

#[cfg(feature = "postgres")]
async fn storage(config: &Config) -> Result<Arc<dyn Storage>> {
    if let Some(url) = &config.database_url {
        tracing::info!("Using PostgreSQL storage");
        let storage = reactor::PgStorage::connect(url)
            .await
            .context("Failed to connect to database")?;
        return Ok(Arc::new(storage));
    }
    Ok(Arc::new(MemoryStorage::new()))
}

#[cfg(not(feature = "postgres"))]
async fn storage(config: &Config) -> Result<Arc<dyn Storage>> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled; using memory storage");
    }
    Ok(Arc::new(MemoryStorage::new()))
}
