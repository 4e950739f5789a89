//! Invitation notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::id::{FarmId, InvitationId, UserId};

/// Messages about the invitation lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InvitationNotification {
    /// An invitation was sent to an invitee.
    Sent {
        /// The invitation ID.
        invitation_id: InvitationId,
        /// The farm the invitation is for.
        farm_id: FarmId,
        /// Where the invitation is delivered.
        invitee_email: String,
        /// The inviting user.
        inviter_id: UserId,
        /// The proposed role name.
        role: String,
        /// The link embedding the code.
        link: String,
        /// When the invitation expires.
        expires_at: DateTime<Utc>,
        /// Personal message from the inviter.
        message: Option<String>,
    },
    /// A reminder about a pending invitation.
    Reminder {
        /// The invitation ID.
        invitation_id: InvitationId,
        /// Where the reminder is delivered.
        invitee_email: String,
        /// The link embedding the code.
        link: String,
        /// Which reminder this is (1-based).
        reminder_number: i32,
        /// When the invitation expires.
        expires_at: DateTime<Utc>,
    },
    /// An invitation needs an approver.
    ApprovalRequested {
        /// The invitation ID.
        invitation_id: InvitationId,
        /// The farm the invitation is for.
        farm_id: FarmId,
        /// The inviting user.
        inviter_id: UserId,
        /// The proposed role name.
        role: String,
    },
    /// An invitation changed status.
    StatusChanged {
        /// The invitation ID.
        invitation_id: InvitationId,
        /// The farm the invitation is for.
        farm_id: FarmId,
        /// The inviting user, who is told about the outcome.
        inviter_id: UserId,
        /// The new status name.
        status: String,
    },
}

impl InvitationNotification {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "invitation.sent",
            Self::Reminder { .. } => "invitation.reminder",
            Self::ApprovalRequested { .. } => "invitation.approval_requested",
            Self::StatusChanged { .. } => "invitation.status_changed",
        }
    }
}
