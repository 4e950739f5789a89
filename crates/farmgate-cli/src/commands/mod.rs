//! CLI command definitions and dispatch.

pub mod access;
pub mod audit;
pub mod bulk;
pub mod invitation;
pub mod migrate;
pub mod sweep;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_core::traits::SystemClock;
use farmgate_database::{DatabasePool, PgStore, PgUserDirectory, Stores};
use farmgate_service::{AccessEngine, EngineDeps, TracingDispatcher};

use crate::output::OutputFormat;

/// Farmgate: farm access control and invitations
#[derive(Debug, Parser)]
#[command(name = "farmgate", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Run background tasks once
    Sweep(sweep::SweepArgs),
    /// Audit log
    Audit(audit::AuditArgs),
    /// Farm membership and permission checks
    Access(access::AccessArgs),
    /// Invitation inspection
    Invitation(invitation::InvitationArgs),
    /// Bulk invitation status
    Bulk(bulk::BulkArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config = load_config(&self.config)?;
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, &config).await,
            Commands::Sweep(args) => sweep::execute(args, config, self.format).await,
            Commands::Audit(args) => audit::execute(args, config, self.format).await,
            Commands::Access(args) => access::execute(args, config, self.format).await,
            Commands::Invitation(args) => invitation::execute(args, config, self.format).await,
            Commands::Bulk(args) => bulk::execute(args, config, self.format).await,
        }
    }
}

/// Load configuration from an explicit file plus the environment
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    debug!(path = config_path, "Loading configuration");
    AppConfig::load_file(config_path)
}

/// Connect to the database named in the configuration
pub async fn connect(config: &AppConfig) -> Result<DatabasePool, AppError> {
    let pool = DatabasePool::connect(&config.database).await?;
    debug!(max_connections = config.database.max_connections, "Connected to database");
    Ok(pool)
}

/// Build an engine over PostgreSQL
pub async fn build_engine(config: AppConfig) -> Result<AccessEngine, AppError> {
    let pool = connect(&config).await?;
    let store = Arc::new(PgStore::new(pool.pool().clone()));
    let directory = Arc::new(PgUserDirectory::new(pool.pool().clone()));
    let deps = EngineDeps::new(
        Stores::from_backend(store),
        Arc::new(SystemClock),
        directory,
        Arc::new(TracingDispatcher),
        config,
    );
    Ok(AccessEngine::new(deps))
}
