//! Invitation service inputs and outputs.

use serde::{Deserialize, Serialize};
use validator::Validate;

use farmgate_core::types::FarmId;
use farmgate_entity::grant::AccessGrant;
use farmgate_entity::invitation::{Invitation, InvitationPriority};
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::role::FarmRole;

/// Request to invite someone to a farm.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    /// The farm being joined.
    pub farm_id: FarmId,
    /// Invitee address, normalised before use.
    #[validate(length(min = 3, max = 254, message = "Email must be 3-254 characters"))]
    pub invitee_email: String,
    /// Role granted on acceptance.
    pub proposed_role: FarmRole,
    /// Permission override. Empty means role defaults.
    #[serde(default)]
    pub custom_permissions: PermissionSet,
    /// Personal note.
    #[validate(length(max = 2000, message = "Message must be at most 2000 characters"))]
    pub message: Option<String>,
    /// Priority.
    #[serde(default)]
    pub priority: InvitationPriority,
    /// Send right away instead of leaving a draft.
    #[serde(default = "default_send_immediately")]
    pub send_immediately: bool,
}

fn default_send_immediately() -> bool {
    true
}

impl CreateInvitationRequest {
    /// An immediately-sent invitation with role defaults.
    pub fn new(farm_id: FarmId, invitee_email: impl Into<String>, proposed_role: FarmRole) -> Self {
        Self {
            farm_id,
            invitee_email: invitee_email.into(),
            proposed_role,
            custom_permissions: PermissionSet::new(),
            message: None,
            priority: InvitationPriority::Normal,
            send_immediately: true,
        }
    }
}

/// The result of answering an invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationOutcome {
    /// The invitation in its final state.
    pub invitation: Invitation,
    /// The grant created or updated by an acceptance.
    pub grant: Option<AccessGrant>,
}
