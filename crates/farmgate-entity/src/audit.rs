//! Audit log entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use farmgate_core::types::{AuditLogId, FarmId, InvitationId, PageRequest, UserId};
use farmgate_core::AppError;

use crate::permission::PermissionSet;
use crate::role::FarmRole;

/// An access-affecting action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// An invitation was created.
    Invited,
    /// An invitation was accepted and a grant created.
    Accepted,
    /// An invitation was declined.
    Rejected,
    /// An invitation was withdrawn.
    InvitationCancelled,
    /// A gated invitation was approved.
    InvitationApproved,
    /// A grant was provisioned directly.
    AccessGranted,
    /// A grant was permanently removed.
    AccessRevoked,
    /// A grant was temporarily blocked.
    AccessSuspended,
    /// A suspended grant was restored.
    AccessRestored,
    /// A grant passed its expiry.
    AccessExpired,
    /// A grant's expiry was set or cleared.
    ExpiryChanged,
    /// A member's role changed.
    RoleChanged,
    /// A member's permission override changed.
    PermissionsModified,
    /// A temporary permission request was approved.
    TemporaryPermissionsGranted,
    /// Approved temporary permissions were withdrawn.
    TemporaryPermissionsRevoked,
}

impl AuditAction {
    /// Every action.
    pub const ALL: [AuditAction; 15] = [
        Self::Invited,
        Self::Accepted,
        Self::Rejected,
        Self::InvitationCancelled,
        Self::InvitationApproved,
        Self::AccessGranted,
        Self::AccessRevoked,
        Self::AccessSuspended,
        Self::AccessRestored,
        Self::AccessExpired,
        Self::ExpiryChanged,
        Self::RoleChanged,
        Self::PermissionsModified,
        Self::TemporaryPermissionsGranted,
        Self::TemporaryPermissionsRevoked,
    ];

    /// Actions surfaced by the security events filter.
    pub const SECURITY_EVENTS: [AuditAction; 4] = [
        Self::AccessRevoked,
        Self::AccessSuspended,
        Self::RoleChanged,
        Self::PermissionsModified,
    ];

    /// Check if this action is in the security events filter.
    pub fn is_security_event(&self) -> bool {
        Self::SECURITY_EVENTS.contains(self)
    }

    /// Return the action as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::InvitationCancelled => "invitation_cancelled",
            Self::InvitationApproved => "invitation_approved",
            Self::AccessGranted => "access_granted",
            Self::AccessRevoked => "access_revoked",
            Self::AccessSuspended => "access_suspended",
            Self::AccessRestored => "access_restored",
            Self::AccessExpired => "access_expired",
            Self::ExpiryChanged => "expiry_changed",
            Self::RoleChanged => "role_changed",
            Self::PermissionsModified => "permissions_modified",
            Self::TemporaryPermissionsGranted => "temporary_permissions_granted",
            Self::TemporaryPermissionsRevoked => "temporary_permissions_revoked",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| AppError::validation(format!("Invalid audit action: '{s}'")))
    }
}

/// An immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique audit entry identifier.
    pub id: AuditLogId,
    /// The farm.
    pub farm_id: FarmId,
    /// The affected member, when known.
    pub target_user_id: Option<UserId>,
    /// The affected address for invitation actions before the invitee registers.
    pub target_email: Option<String>,
    /// The acting user.
    pub action_performed_by: UserId,
    /// What happened.
    pub action: AuditAction,
    /// Role before the change.
    pub previous_role: Option<FarmRole>,
    /// Role after the change.
    pub new_role: Option<FarmRole>,
    /// Effective permissions before the change.
    pub previous_permissions: PermissionSet,
    /// Effective permissions after the change.
    pub new_permissions: PermissionSet,
    /// Free-text reason from the actor.
    pub reason: Option<String>,
    /// The related invitation.
    pub invitation_id: Option<InvitationId>,
    /// When the action occurred.
    pub timestamp: DateTime<Utc>,
}

/// Data required to create a new audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuditLogEntry {
    /// The farm.
    pub farm_id: FarmId,
    /// The affected member.
    pub target_user_id: Option<UserId>,
    /// The affected address.
    pub target_email: Option<String>,
    /// The acting user.
    pub action_performed_by: UserId,
    /// What happened.
    pub action: AuditAction,
    /// Role before.
    pub previous_role: Option<FarmRole>,
    /// Role after.
    pub new_role: Option<FarmRole>,
    /// Permissions before.
    pub previous_permissions: PermissionSet,
    /// Permissions after.
    pub new_permissions: PermissionSet,
    /// Reason.
    pub reason: Option<String>,
    /// Related invitation.
    pub invitation_id: Option<InvitationId>,
}

impl CreateAuditLogEntry {
    /// Start an entry for an action on a farm.
    pub fn new(farm_id: FarmId, actor: UserId, action: AuditAction) -> Self {
        Self {
            farm_id,
            target_user_id: None,
            target_email: None,
            action_performed_by: actor,
            action,
            previous_role: None,
            new_role: None,
            previous_permissions: PermissionSet::new(),
            new_permissions: PermissionSet::new(),
            reason: None,
            invitation_id: None,
        }
    }

    /// Set the affected member.
    pub fn target(mut self, user_id: UserId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    /// Set the affected address.
    pub fn target_email(mut self, email: impl Into<String>) -> Self {
        self.target_email = Some(email.into());
        self
    }

    /// Record the role and permissions before the change.
    pub fn before(mut self, role: FarmRole, permissions: PermissionSet) -> Self {
        self.previous_role = Some(role);
        self.previous_permissions = permissions;
        self
    }

    /// Record the role and permissions after the change.
    pub fn after(mut self, role: FarmRole, permissions: PermissionSet) -> Self {
        self.new_role = Some(role);
        self.new_permissions = permissions;
        self
    }

    /// Record only the permissions held before the change.
    pub fn before_permissions(mut self, permissions: PermissionSet) -> Self {
        self.previous_permissions = permissions;
        self
    }

    /// Record only the permissions held after the change.
    pub fn after_permissions(mut self, permissions: PermissionSet) -> Self {
        self.new_permissions = permissions;
        self
    }

    /// Set the reason.
    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    /// Link the invitation.
    pub fn invitation(mut self, invitation_id: InvitationId) -> Self {
        self.invitation_id = Some(invitation_id);
        self
    }

    /// Stamp the entry.
    pub fn into_entry(self, timestamp: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditLogId::new(),
            farm_id: self.farm_id,
            target_user_id: self.target_user_id,
            target_email: self.target_email,
            action_performed_by: self.action_performed_by,
            action: self.action,
            previous_role: self.previous_role,
            new_role: self.new_role,
            previous_permissions: self.previous_permissions,
            new_permissions: self.new_permissions,
            reason: self.reason,
            invitation_id: self.invitation_id,
            timestamp,
        }
    }
}

/// Filters for reading the audit log. Results are newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Restrict to a farm.
    pub farm_id: Option<FarmId>,
    /// Restrict to an affected member.
    pub target_user_id: Option<UserId>,
    /// Restrict to an acting user.
    pub actor_id: Option<UserId>,
    /// Restrict to these actions.
    pub actions: Option<Vec<AuditAction>>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    /// Only the security events.
    pub security_only: bool,
    /// Page to return.
    pub page: PageRequest,
}

impl AuditQuery {
    /// All entries for a farm.
    pub fn for_farm(farm_id: FarmId) -> Self {
        Self {
            farm_id: Some(farm_id),
            ..Self::default()
        }
    }

    /// Check whether an entry passes every filter. Pagination is not applied.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.farm_id.is_none_or(|f| entry.farm_id == f)
            && self
                .target_user_id
                .is_none_or(|u| entry.target_user_id == Some(u))
            && self.actor_id.is_none_or(|a| entry.action_performed_by == a)
            && self
                .actions
                .as_ref()
                .is_none_or(|set| set.contains(&entry.action))
            && self.since.is_none_or(|s| entry.timestamp >= s)
            && self.until.is_none_or(|u| entry.timestamp < u)
            && (!self.security_only || entry.action.is_security_event())
    }

    /// The action filter as the store applies it, with security-only folded in.
    pub fn effective_actions(&self) -> Option<Vec<AuditAction>> {
        let security = self.security_only.then(|| AuditAction::SECURITY_EVENTS.to_vec());
        match (self.actions.clone(), security) {
            (Some(a), Some(s)) => Some(a.into_iter().filter(|x| s.contains(x)).collect()),
            (a, None) => a,
            (None, s) => s,
        }
    }
}
