//! Bulk invitation commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_core::types::{BulkInvitationId, FarmId};
use farmgate_entity::bulk::{BulkInvitation, BulkItemOutcome};

use crate::output::{self, OutputFormat};

/// Arguments for bulk commands
#[derive(Debug, Args)]
pub struct BulkArgs {
    /// Bulk subcommand
    #[command(subcommand)]
    pub command: BulkCommand,
}

/// Bulk subcommands
#[derive(Debug, Subcommand)]
pub enum BulkCommand {
    /// Show a batch with its per-address results
    Status {
        /// Bulk invitation ID
        id: BulkInvitationId,
    },
    /// List a farm's batches
    List {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct BulkRow {
    id: String,
    role: String,
    status: String,
    total: i32,
    outstanding: i32,
    accepted: i32,
    rejected: i32,
    expired: i32,
    failed: i32,
    created: String,
}

impl From<&BulkInvitation> for BulkRow {
    fn from(bulk: &BulkInvitation) -> Self {
        Self {
            id: bulk.id.to_string(),
            role: bulk.default_role.to_string(),
            status: bulk.status.to_string(),
            total: bulk.total_invitations,
            outstanding: bulk.sent_count,
            accepted: bulk.accepted_count,
            rejected: bulk.rejected_count,
            expired: bulk.expired_count,
            failed: bulk.failed_count,
            created: output::timestamp(bulk.created_at),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ItemRow {
    position: i32,
    email: String,
    outcome: String,
    detail: String,
}

/// Execute bulk commands
pub async fn execute(
    args: &BulkArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = super::build_engine(config).await?;

    match &args.command {
        BulkCommand::Status { id } => {
            let report = engine.bulk.report(*id).await?;
            match format {
                OutputFormat::Json => output::print_json(&report),
                OutputFormat::Table => {
                    output::print_list(&[BulkRow::from(&report.bulk)], format);
                    output::print_kv(
                        "Completion",
                        &format!("{:.1}%", report.bulk.completion_percentage()),
                    );
                    output::print_kv(
                        "Acceptance rate",
                        &format!("{:.1}%", report.bulk.acceptance_rate()),
                    );
                    let rows: Vec<ItemRow> = report
                        .items
                        .iter()
                        .map(|item| ItemRow {
                            position: item.position,
                            email: item.email.clone(),
                            outcome: item.outcome.label().to_string(),
                            detail: match &item.outcome {
                                BulkItemOutcome::Sent { invitation_id } => invitation_id.to_string(),
                                BulkItemOutcome::Failed { reason } => reason.clone(),
                                BulkItemOutcome::Pending | BulkItemOutcome::Skipped => "-".to_string(),
                            },
                        })
                        .collect();
                    output::print_list(&rows, format);
                }
            }
        }
        BulkCommand::List { farm } => {
            let batches = engine.bulk.list_for_farm(*farm).await?;
            let rows: Vec<BulkRow> = batches.iter().map(BulkRow::from).collect();
            output::print_list(&rows, format);
        }
    }

    Ok(())
}
