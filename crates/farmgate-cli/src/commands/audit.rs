//! Audit log commands.

use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_core::types::{FarmId, PageRequest, UserId};
use farmgate_entity::audit::{AuditAction, AuditLogEntry, AuditQuery};

use crate::output::{self, OutputFormat};

const EXPORT_PAGE_SIZE: u64 = 100;

/// Arguments for audit commands
#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Audit subcommand
    #[command(subcommand)]
    pub command: AuditCommand,
}

/// Audit subcommands
#[derive(Debug, Subcommand)]
pub enum AuditCommand {
    /// Search a farm's audit log, newest first
    Search {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
        /// Restrict to an acting user
        #[arg(long)]
        actor: Option<UserId>,
        /// Restrict to an affected member
        #[arg(long)]
        target: Option<UserId>,
        /// Restrict to actions (repeatable)
        #[arg(short, long)]
        action: Vec<AuditAction>,
        /// Only security events
        #[arg(long)]
        security: bool,
        /// Only the last N days
        #[arg(short, long)]
        days: Option<i64>,
        /// Page number
        #[arg(long, default_value = "1")]
        page: u64,
        /// Entries per page
        #[arg(short, long, default_value = "50")]
        limit: u64,
    },
    /// Export a farm's audit log to a JSON file
    Export {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
        /// Output file path
        #[arg(short, long, default_value = "audit_export.json")]
        output: String,
        /// Days of history to export
        #[arg(short, long, default_value = "30")]
        days: i64,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct AuditRow {
    time: String,
    action: String,
    actor: String,
    target: String,
    role: String,
    reason: String,
}

impl From<&AuditLogEntry> for AuditRow {
    fn from(entry: &AuditLogEntry) -> Self {
        let role = match (entry.previous_role, entry.new_role) {
            (Some(from), Some(to)) if from != to => format!("{from} -> {to}"),
            (_, Some(to)) => to.to_string(),
            (Some(from), None) => from.to_string(),
            (None, None) => "-".to_string(),
        };
        Self {
            time: output::timestamp(entry.timestamp),
            action: entry.action.to_string(),
            actor: entry.action_performed_by.to_string(),
            target: output::or_dash(
                entry
                    .target_user_id
                    .map(|u| u.to_string())
                    .or_else(|| entry.target_email.clone()),
            ),
            role,
            reason: output::or_dash(entry.reason.as_deref()),
        }
    }
}

/// Execute audit commands
pub async fn execute(
    args: &AuditArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = super::build_engine(config).await?;

    match &args.command {
        AuditCommand::Search {
            farm,
            actor,
            target,
            action,
            security,
            days,
            page,
            limit,
        } => {
            let query = AuditQuery {
                actor_id: *actor,
                target_user_id: *target,
                actions: (!action.is_empty()).then(|| action.clone()),
                since: days.map(|d| Utc::now() - Duration::days(d)),
                security_only: *security,
                page: PageRequest::new(*page, *limit),
                ..AuditQuery::for_farm(*farm)
            };
            let result = engine.audit.query(&query).await?;
            match format {
                OutputFormat::Json => output::print_json(&result),
                OutputFormat::Table => {
                    let rows: Vec<AuditRow> = result.items.iter().map(AuditRow::from).collect();
                    output::print_list(&rows, format);
                    println!(
                        "Page {} of {} entries{}",
                        result.page,
                        result.total_items,
                        if result.has_next() { " (more available)" } else { "" }
                    );
                }
            }
        }
        AuditCommand::Export { farm, output: path, days } => {
            let since = Utc::now() - Duration::days(*days);
            let mut entries = Vec::new();
            let mut page = 1;
            loop {
                let query = AuditQuery {
                    since: Some(since),
                    page: PageRequest::new(page, EXPORT_PAGE_SIZE),
                    ..AuditQuery::for_farm(*farm)
                };
                let result = engine.audit.query(&query).await?;
                let more = result.has_next();
                entries.extend(result.items);
                if !more {
                    break;
                }
                page += 1;
            }

            let json = serde_json::to_string_pretty(&entries)?;
            tokio::fs::write(path, json)
                .await
                .map_err(|e| AppError::internal(format!("Failed to write {path}: {e}")))?;
            output::print_success(&format!("Exported {} entries to {path}", entries.len()));
        }
    }

    Ok(())
}
