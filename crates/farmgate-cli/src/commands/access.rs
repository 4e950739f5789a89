//! Membership and permission commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_core::types::{FarmId, UserId};
use farmgate_entity::grant::AccessGrant;
use farmgate_entity::permission::Permission;

use crate::output::{self, OutputFormat};

/// Arguments for access commands
#[derive(Debug, Args)]
pub struct AccessArgs {
    /// Access subcommand
    #[command(subcommand)]
    pub command: AccessCommand,
}

/// Access subcommands
#[derive(Debug, Subcommand)]
pub enum AccessCommand {
    /// Check whether a user holds a permission on a farm
    Check {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
        /// User ID
        #[arg(long)]
        user: UserId,
        /// Permission name, e.g. `manage_access`
        #[arg(short, long)]
        permission: Permission,
    },
    /// List a farm's members
    Members {
        /// Farm ID
        #[arg(long)]
        farm: FarmId,
    },
    /// List the farms a user belongs to
    Farms {
        /// User ID
        #[arg(long)]
        user: UserId,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct GrantRow {
    farm: String,
    user: String,
    role: String,
    status: String,
    permissions: usize,
    expires: String,
    last_access: String,
}

impl From<&AccessGrant> for GrantRow {
    fn from(grant: &AccessGrant) -> Self {
        Self {
            farm: grant.farm_id.to_string(),
            user: grant.user_id.to_string(),
            role: grant.role.to_string(),
            status: grant.status.to_string(),
            permissions: grant.permissions.len(),
            expires: output::or_dash(grant.expires_at.map(output::timestamp)),
            last_access: output::or_dash(grant.last_accessed_at.map(output::timestamp)),
        }
    }
}

/// Execute access commands
pub async fn execute(
    args: &AccessArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = super::build_engine(config).await?;

    match &args.command {
        AccessCommand::Check {
            farm,
            user,
            permission,
        } => {
            let allowed = engine.check_permission(*farm, *user, *permission).await?;
            match format {
                OutputFormat::Json => output::print_json(&serde_json::json!({
                    "farm_id": farm,
                    "user_id": user,
                    "permission": permission,
                    "allowed": allowed,
                })),
                OutputFormat::Table => {
                    output::print_kv("Permission", permission.as_str());
                    output::print_kv("Allowed", if allowed { "yes" } else { "no" });
                }
            }
        }
        AccessCommand::Members { farm } => {
            let grants = engine.access.list_farm_members(*farm).await?;
            let rows: Vec<GrantRow> = grants.iter().map(GrantRow::from).collect();
            output::print_list(&rows, format);
        }
        AccessCommand::Farms { user } => {
            let grants = engine.access.list_user_farms(*user).await?;
            let rows: Vec<GrantRow> = grants.iter().map(GrantRow::from).collect();
            output::print_list(&rows, format);
        }
    }

    Ok(())
}
