//! Background worker configuration.

use serde::{Deserialize, Serialize};

/// Scheduled task configuration. Cron expressions carry a seconds field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the scheduler is started by the server.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Schedule of the expiration sweep.
    #[serde(default = "default_expiration_sweep_cron")]
    pub expiration_sweep_cron: String,
    /// Schedule of the reminder dispatch.
    #[serde(default = "default_reminder_cron")]
    pub reminder_cron: String,
    /// Schedule of audit/analytics retention and invitation archival.
    #[serde(default = "default_retention_cron")]
    pub retention_cron: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiration_sweep_cron: default_expiration_sweep_cron(),
            reminder_cron: default_reminder_cron(),
            retention_cron: default_retention_cron(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_expiration_sweep_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_reminder_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_retention_cron() -> String {
    "0 30 3 * * *".to_string()
}
