//! Audit trail and analytics configuration.

use serde::{Deserialize, Serialize};

/// Audit trail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Days audit entries are kept before retention pruning removes them.
    #[serde(default = "default_audit_retention")]
    pub retention_days: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_audit_retention(),
        }
    }
}

/// Invitation analytics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Record events on the calling task instead of a spawned task.
    #[serde(default)]
    pub inline: bool,
    /// Days analytics events are kept.
    #[serde(default = "default_analytics_retention")]
    pub retention_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            inline: false,
            retention_days: default_analytics_retention(),
        }
    }
}

fn default_audit_retention() -> i64 {
    730
}

fn default_analytics_retention() -> i64 {
    365
}
