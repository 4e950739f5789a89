//! Invitation inspection commands.

use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_core::types::FarmId;
use farmgate_entity::invitation::{Invitation, InvitationStatus};

use crate::output::{self, OutputFormat};

/// Arguments for invitation commands
#[derive(Debug, Args)]
pub struct InvitationArgs {
    /// Invitation subcommand
    #[command(subcommand)]
    pub command: InvitationCommand,
}

/// Invitation subcommands
#[derive(Debug, Subcommand)]
pub enum InvitationCommand {
    /// Show one invitation and its event timeline
    Inspect {
        /// Invitation code
        code: String,
    },
    /// List a farm's invitations
    List {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
        /// Restrict to a status
        #[arg(short, long)]
        status: Option<InvitationStatus>,
    },
    /// Show the invitation funnel for a farm
    Funnel {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
        /// Days of history
        #[arg(short, long, default_value = "30")]
        days: i64,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct InvitationRow {
    code: String,
    email: String,
    role: String,
    status: String,
    reminders: i32,
    expires: String,
}

impl From<&Invitation> for InvitationRow {
    fn from(inv: &Invitation) -> Self {
        Self {
            code: inv.invitation_code.clone(),
            email: inv.invitee_email.clone(),
            role: inv.proposed_role.to_string(),
            status: inv.status.to_string(),
            reminders: inv.reminders_sent,
            expires: output::timestamp(inv.expires_at),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    time: String,
    event: String,
}

/// Execute invitation commands
pub async fn execute(
    args: &InvitationArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = super::build_engine(config).await?;

    match &args.command {
        InvitationCommand::Inspect { code } => {
            let invitation = engine.invitations.get_invitation_by_code(code).await?;
            let timeline = engine.deps().analytics.timeline(invitation.id).await?;
            match format {
                OutputFormat::Json => output::print_json(&serde_json::json!({
                    "invitation": invitation,
                    "timeline": timeline,
                })),
                OutputFormat::Table => {
                    println!("Invitation {}:", invitation.id);
                    output::print_kv("Farm", &invitation.farm_id.to_string());
                    output::print_kv("Invitee", &invitation.invitee_email);
                    output::print_kv("Role", invitation.proposed_role.as_str());
                    output::print_kv("Status", invitation.status.as_str());
                    output::print_kv("Sent", &output::or_dash(invitation.sent_at.map(output::timestamp)));
                    output::print_kv("Expires", &output::timestamp(invitation.expires_at));
                    output::print_kv(
                        "Reminders",
                        &format!("{}/{}", invitation.reminders_sent, invitation.max_reminders),
                    );
                    output::print_kv("Link", &invitation.invitation_link);
                    let rows: Vec<EventRow> = timeline
                        .iter()
                        .map(|e| EventRow {
                            time: output::timestamp(e.occurred_at),
                            event: e.event_type.to_string(),
                        })
                        .collect();
                    output::print_list(&rows, format);
                }
            }
        }
        InvitationCommand::List { farm, status } => {
            let invitations = engine.invitations.list_for_farm(*farm, *status).await?;
            let rows: Vec<InvitationRow> = invitations.iter().map(InvitationRow::from).collect();
            output::print_list(&rows, format);
        }
        InvitationCommand::Funnel { farm, days } => {
            let since = Utc::now() - Duration::days(*days);
            let funnel = engine.deps().analytics.funnel(*farm, since).await?;
            match format {
                OutputFormat::Json => output::print_json(&funnel),
                OutputFormat::Table => {
                    for (step, count) in &funnel.counts {
                        output::print_kv(step.as_str(), &count.to_string());
                    }
                    output::print_kv("Open rate", &format!("{:.1}%", funnel.open_rate));
                    output::print_kv("Click rate", &format!("{:.1}%", funnel.click_rate));
                    output::print_kv("Acceptance rate", &format!("{:.1}%", funnel.acceptance_rate));
                }
            }
        }
    }

    Ok(())
}
