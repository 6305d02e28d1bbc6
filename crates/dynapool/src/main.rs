use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dynapool::adapter::DynamicPoolConfig;
use dynapool::limiter::{InMemoryRateLimitStore, PostgresRateLimitStore, RateLimitStore};
use dynapool::refresh::PoolProperties;
use dynapool::{ControlPlane, ControlPlaneConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG wins; otherwise LOG_LEVEL applies to this crate (default: info)
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dynapool={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("dynapool starting...");

    let config = ControlPlaneConfig::from_env().context("Invalid configuration")?;

    let store: Arc<dyn RateLimitStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresRateLimitStore::connect(url, config.db_max_connections)
                .await
                .context("Failed to connect to rate-limit store")?;
            store
                .ensure_schema()
                .await
                .context("Failed to prepare rate-limit schema")?;
            tracing::info!("Using PostgreSQL rate-limit store");
            Arc::new(store)
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory rate-limit store");
            Arc::new(InMemoryRateLimitStore::new())
        }
    };

    let plane = ControlPlane::builder(config).with_store(store).build();

    // DYNAPOOL_POOLS: JSON object of pool name to properties
    let pools: BTreeMap<String, PoolProperties> = match std::env::var("DYNAPOOL_POOLS") {
        Ok(json) => serde_json::from_str(&json).context("Invalid DYNAPOOL_POOLS")?,
        Err(_) => BTreeMap::from([("default".to_string(), PoolProperties::new())]),
    };

    for name in pools.keys() {
        plane
            .create_dynamic_pool(name, DynamicPoolConfig::default())
            .with_context(|| format!("Failed to create pool {name}"))?;
    }
    for (name, result) in plane.refresh_all(&pools).await {
        if let Err(e) = result {
            tracing::error!(pool = %name, error = %e, "Initial pool properties rejected");
        }
    }

    plane.start()?;
    tracing::info!(pools = ?plane.registry().names(), "Control plane running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    plane.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("dynapool shutdown complete");
    Ok(())
}
