//! Access notifications.

use serde::{Deserialize, Serialize};

use crate::types::id::{FarmId, PermissionRequestId, UserId};

/// Messages about access grant changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccessNotification {
    /// A user's access to a farm changed.
    Changed {
        /// The farm.
        farm_id: FarmId,
        /// The affected user.
        user_id: UserId,
        /// The acting user.
        actor_id: UserId,
        /// The audit action name (e.g. `"access_revoked"`).
        action: String,
        /// The reason given by the actor.
        reason: Option<String>,
    },
    /// A temporary permission request was reviewed.
    PermissionRequestReviewed {
        /// The request ID.
        request_id: PermissionRequestId,
        /// The farm.
        farm_id: FarmId,
        /// The requesting user.
        requester_id: UserId,
        /// The new request status name.
        status: String,
    },
}

impl AccessNotification {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Changed { .. } => "access.changed",
            Self::PermissionRequestReviewed { .. } => "access.permission_request_reviewed",
        }
    }
}
