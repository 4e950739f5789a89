//! Farmgate server.
//!
//! Wires the store, the engine, and the background scheduler together and
//! runs until a shutdown signal arrives.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_core::traits::SystemClock;
use farmgate_database::{DatabasePool, PgStore, PgUserDirectory, Stores};
use farmgate_service::{AccessEngine, EngineDeps, TracingDispatcher};
use farmgate_worker::{CronScheduler, TaskExecutor};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load `config/default.toml`, the `FARMGATE_ENV` overlay, and the
/// environment.
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("FARMGATE_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Farmgate");

    // ── Database connection + migrations ─────────────────────────
    let db_pool = DatabasePool::connect(&config.database).await?;
    tracing::info!("Running database migrations...");
    farmgate_database::migration::run_migrations(db_pool.pool()).await?;
    tracing::info!("Database migrations complete");

    // ── Engine ───────────────────────────────────────────────────
    let store = Arc::new(PgStore::new(db_pool.pool().clone()));
    let directory = Arc::new(PgUserDirectory::new(db_pool.pool().clone()));
    let worker_config = config.worker.clone();
    let deps = EngineDeps::new(
        Stores::from_backend(store),
        Arc::new(SystemClock),
        directory,
        Arc::new(TracingDispatcher),
        config,
    );
    let engine = AccessEngine::new(deps);
    tracing::info!("Access engine ready");

    // ── Background scheduler ─────────────────────────────────────
    let scheduler = if worker_config.enabled {
        let executor = Arc::new(TaskExecutor::for_engine(&engine));
        let scheduler = CronScheduler::new(executor, worker_config).await?;
        scheduler.register_default_tasks().await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("Background scheduler disabled");
        None
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping...");

    if let Some(mut scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler did not shut down cleanly");
        }
    }
    db_pool.close().await;

    tracing::info!("Farmgate shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
