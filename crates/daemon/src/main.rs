//! Terraflow Engine - Worker Daemon Entry Point
//! Claims conversion jobs from the shared store and drives them through
//! the pipeline executor. The API process submits into the same store.

mod config;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::EngineConfig;
use terraflow_core::application::{shutdown_channel, PipelineRunner, Worker};
use terraflow_core::port::time_provider::SystemTimeProvider;
use terraflow_core::port::JobStore;
use terraflow_infra_sqlite::{create_pool, run_migrations, SqliteJobStore, SqliteProjectStore};
use terraflow_infra_storage::FsBlobStore;
use terraflow_infra_tools::{ExternalCloudTools, GdalRasterTools};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (JSON for production, pretty for dev)
    let log_format = std::env::var("TERRAFLOW_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("terraflow=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Terraflow Engine v{} starting...", VERSION);

    // 2. Load configuration
    let config = EngineConfig::from_env();
    info!(db_path = %config.db_path, blob_root = %config.blob_root.display(), "Initializing stores...");

    // 3. Initialize database
    let pool = create_pool(&config.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time = Arc::new(SystemTimeProvider);
    let jobs = Arc::new(SqliteJobStore::new(pool.clone(), time.clone()));
    let projects = Arc::new(SqliteProjectStore::new(pool.clone(), time.clone()));
    let blobs = Arc::new(
        FsBlobStore::new(&config.blob_root, &config.public_base_url)
            .map_err(|e| anyhow::anyhow!("Blob store init failed: {}", e))?,
    );
    let cloud_tools = Arc::new(ExternalCloudTools::new(config.cloud_tools.clone()));
    let raster_tools = Arc::new(GdalRasterTools::new(config.raster_tools.clone()));

    let pipeline = Arc::new(PipelineRunner::new(
        jobs.clone(),
        projects,
        blobs,
        cloud_tools,
        raster_tools,
        time.clone(),
        config.work_dir.clone(),
    ));

    match jobs.count_active().await {
        Ok(active) => info!(active_jobs = active, "Store ready"),
        Err(e) => tracing::warn!(error = %e, "Could not count active jobs"),
    }

    // 5. Start the worker (stale-job sweep runs inside, before polling)
    info!("Starting worker...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let worker = Worker::new(jobs, pipeline, time, config.worker.clone());

    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(shutdown_rx).await {
            tracing::error!(error = ?e, "Worker failed");
        }
    });

    info!("Engine ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");
    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), worker_handle).await;

    info!("Shutdown complete.");
    Ok(())
}
