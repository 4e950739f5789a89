//! Invitation lifecycle configuration.

use serde::{Deserialize, Serialize};

/// Invitation lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationConfig {
    /// Days from sending until an invitation expires.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    /// Maximum reminders per invitation.
    #[serde(default = "default_max_reminders")]
    pub max_reminders: i32,
    /// Minimum hours between two reminders.
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_hours: i64,
    /// Base URL of the invitation link. The code is appended as a path segment.
    #[serde(default = "default_link_base_url")]
    pub link_base_url: String,
    /// How many codes are drawn before giving up on a collision-free one.
    #[serde(default = "default_max_code_attempts")]
    pub max_code_attempts: u32,
    /// Roles whose invitations need approval when the inviter is not an owner.
    /// Values are role names (`"manager"`, `"supervisor"`, ...).
    #[serde(default = "default_approval_required_roles")]
    pub approval_required_roles: Vec<String>,
    /// Days after reaching a terminal state before an invitation is archived.
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,
    /// Upper bound for the size of a custom permission list.
    #[serde(default = "default_max_custom_permissions")]
    pub max_custom_permissions: usize,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_expiry_days(),
            max_reminders: default_max_reminders(),
            reminder_interval_hours: default_reminder_interval(),
            link_base_url: default_link_base_url(),
            max_code_attempts: default_max_code_attempts(),
            approval_required_roles: default_approval_required_roles(),
            archive_after_days: default_archive_after_days(),
            max_custom_permissions: default_max_custom_permissions(),
        }
    }
}

fn default_expiry_days() -> i64 {
    7
}

fn default_max_reminders() -> i32 {
    3
}

fn default_reminder_interval() -> i64 {
    24
}

fn default_link_base_url() -> String {
    "https://app.farmgate.local/invite".to_string()
}

fn default_max_code_attempts() -> u32 {
    8
}

fn default_approval_required_roles() -> Vec<String> {
    vec!["manager".to_string()]
}

fn default_archive_after_days() -> i64 {
    90
}

fn default_max_custom_permissions() -> usize {
    64
}
