mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use nodeflow_durable::{HttpOrchestrator, PostgresExecutionQueueStore, WorkerPool};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // RUST_LOG overrides the default filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("nodeflow_worker=debug,nodeflow_durable=debug,nodeflow_core=info")
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }
    tracing::info!("nodeflow-worker starting...");

    let config = WorkerConfig::from_env()?;

    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = PostgresExecutionQueueStore::new(pool);
    store
        .migrate()
        .await
        .context("Failed to run queue migrations")?;

    let orchestrator =
        HttpOrchestrator::with_timeout(&config.orchestrator_url, config.orchestrator_timeout)
            .context("Failed to create orchestrator client")?;

    tracing::info!(
        worker_id = %config.worker_id,
        orchestrator = %orchestrator.endpoint(),
        workspaces = config.workspace_ids.len(),
        max_concurrency = config.max_concurrency,
        "Starting dispatch worker"
    );

    let workers = WorkerPool::new(Arc::new(store), Arc::new(orchestrator), config.pool_config());
    workers.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    workers.shutdown().await?;
    tracing::info!("Worker shutdown complete");
    Ok(())
}
