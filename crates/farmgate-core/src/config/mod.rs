//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Every field carries a serde default so a partial file is
//! always enough.

pub mod access;
pub mod audit;
pub mod database;
pub mod invitation;
pub mod logging;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::access::{AccessConfig, BulkConfig, PermissionRequestConfig};
pub use self::audit::{AnalyticsConfig, AuditConfig};
pub use self::database::DatabaseConfig;
pub use self::invitation::InvitationConfig;
pub use self::logging::LoggingConfig;
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Invitation lifecycle settings.
    #[serde(default)]
    pub invitation: InvitationConfig,
    /// Access grant settings.
    #[serde(default)]
    pub access: AccessConfig,
    /// Temporary permission request settings.
    #[serde(default)]
    pub permission_request: PermissionRequestConfig,
    /// Bulk invitation settings.
    #[serde(default)]
    pub bulk: BulkConfig,
    /// Audit trail settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Invitation analytics settings.
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Background worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default`, the environment-specific overlay
    /// `config/{env}`, and environment variables prefixed with `FARMGATE__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FARMGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Load configuration from a single explicit file plus the environment.
    pub fn load_file(path: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("FARMGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.invitation.expiry_days, 7);
        assert_eq!(config.invitation.max_reminders, 3);
        assert_eq!(config.invitation.reminder_interval_hours, 24);
        assert_eq!(config.bulk.max_batch_size, 500);
        assert!(!config.analytics.inline);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"invitation": {"expiry_days": 14}}"#).expect("parse");
        assert_eq!(config.invitation.expiry_days, 14);
        assert_eq!(config.invitation.max_reminders, 3);
        assert_eq!(config.logging.level, "info");
    }
}
