//! Access grant, permission request, and bulk invitation configuration.

use serde::{Deserialize, Serialize};

/// Access grant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Whether successful permission checks update `last_accessed_at`.
    #[serde(default = "default_true")]
    pub touch_last_accessed: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            touch_last_accessed: true,
        }
    }
}

/// Temporary permission request configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestConfig {
    /// Longest duration a temporary elevation may be requested for.
    #[serde(default = "default_max_duration")]
    pub max_duration_hours: i64,
    /// Hours a request may stay pending before the sweep expires it.
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_hours: i64,
}

impl Default for PermissionRequestConfig {
    fn default() -> Self {
        Self {
            max_duration_hours: default_max_duration(),
            pending_ttl_hours: default_pending_ttl(),
        }
    }
}

/// Bulk invitation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Largest number of addresses accepted in one batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_duration() -> i64 {
    168
}

fn default_pending_ttl() -> i64 {
    72
}

fn default_max_batch_size() -> usize {
    500
}
