//! Access grant entity and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use farmgate_core::types::{FarmId, GrantId, InvitationId, UserId};
use farmgate_core::{AppError, AppResult};

use crate::permission::{Permission, PermissionSet};
use crate::role::FarmRole;

/// Lifecycle state of an access grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "grant_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// Provisioned but not yet confirmed by the user.
    Pending,
    /// Active membership.
    Accepted,
    /// The user declined a pending grant.
    Rejected,
    /// Permanently removed.
    Revoked,
    /// The validity window elapsed.
    Expired,
    /// Temporarily blocked.
    Suspended,
}

impl GrantStatus {
    /// Check if the status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Revoked | Self::Expired)
    }

    /// Check if the edge `self -> next` exists.
    pub fn can_transition_to(&self, next: GrantStatus) -> bool {
        use GrantStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted | Rejected | Expired)
                | (Accepted, Suspended | Revoked | Expired)
                | (Suspended, Accepted | Revoked | Expired)
        )
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            "suspended" => Ok(Self::Suspended),
            _ => Err(AppError::validation(format!("Invalid grant status: '{s}'"))),
        }
    }
}

/// The authoritative record that a user holds a role on a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Row identifier.
    pub id: GrantId,
    /// The farm.
    pub farm_id: FarmId,
    /// The member.
    pub user_id: UserId,
    /// Role on the farm.
    pub role: FarmRole,
    /// Explicit permission override. Empty means the role defaults apply.
    pub permissions: PermissionSet,
    /// Who invited or provisioned the member.
    pub invited_by: UserId,
    /// When the invitation was sent or the grant provisioned.
    pub invited_at: DateTime<Utc>,
    /// When the grant became active.
    pub accepted_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: GrantStatus,
    /// End of the validity window, if time-boxed.
    pub expires_at: Option<DateTime<Utc>>,
    /// Cleared when the grant is logically deleted.
    pub is_active: bool,
    /// Last successful permission check.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// The invitation that produced this grant.
    pub invitation_id: Option<InvitationId>,
    /// Compare-and-set version, bumped on every write.
    pub version: i64,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last changed.
    pub updated_at: DateTime<Utc>,
}

impl AccessGrant {
    /// Build a fresh grant in the given status.
    pub fn new(
        farm_id: FarmId,
        user_id: UserId,
        role: FarmRole,
        invited_by: UserId,
        status: GrantStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GrantId::new(),
            farm_id,
            user_id,
            role,
            permissions: PermissionSet::new(),
            invited_by,
            invited_at: now,
            accepted_at: (status == GrantStatus::Accepted).then_some(now),
            status,
            expires_at: None,
            is_active: !status.is_terminal(),
            last_accessed_at: None,
            invitation_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `is_active ∧ status = accepted ∧ (no expiry ∨ expiry in the future)`.
    pub fn is_valid_access(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.status == GrantStatus::Accepted
            && self.expires_at.is_none_or(|at| at > now)
    }

    /// Permissions in force: the override if set, else the role defaults.
    pub fn effective_permissions(&self) -> PermissionSet {
        if self.permissions.is_empty() {
            self.role.default_permissions()
        } else {
            self.permissions.clone()
        }
    }

    /// Check a permission against a valid grant.
    pub fn has_permission(&self, permission: Permission, now: DateTime<Utc>) -> bool {
        self.is_valid_access(now) && self.effective_permissions().contains(permission)
    }

    /// Check if this is a live owner grant, counted by the last-owner guard.
    /// Suspended owners do not count.
    pub fn is_active_owner(&self) -> bool {
        self.is_active && self.role.is_owner() && self.status == GrantStatus::Accepted
    }

    /// Check if this grant keeps the farm managed: a live owner with no
    /// expiry that can still manage access and roles. The last-owner guard
    /// never lets the farm drop to zero of these.
    pub fn holds_owner_floor(&self) -> bool {
        let permissions = self.effective_permissions();
        self.is_active_owner()
            && self.expires_at.is_none()
            && permissions.contains(Permission::ManageAccess)
            && permissions.contains(Permission::ManageRoles)
    }

    /// Check if the validity window has closed.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Apply a status transition and its side effects.
    pub fn transition(&mut self, next: GrantStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::invalid_transition(format!(
                "Access grant cannot move from {} to {}",
                self.status, next
            )));
        }
        if self.status == GrantStatus::Pending && next == GrantStatus::Accepted {
            self.accepted_at = Some(now);
        }
        self.status = next;
        if next.is_terminal() {
            self.is_active = false;
        }
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(status: GrantStatus) -> AccessGrant {
        AccessGrant::new(
            FarmId::new(),
            UserId::new(),
            FarmRole::Worker,
            UserId::new(),
            status,
            Utc::now(),
        )
    }

    const ALL_STATUSES: [GrantStatus; 6] = [
        GrantStatus::Pending,
        GrantStatus::Accepted,
        GrantStatus::Rejected,
        GrantStatus::Revoked,
        GrantStatus::Expired,
        GrantStatus::Suspended,
    ];

    #[test]
    fn test_invalid_grants_never_authorize() {
        let now = Utc::now();
        for status in ALL_STATUSES {
            for active in [true, false] {
                for expiry in [None, Some(now - Duration::hours(1)), Some(now + Duration::hours(1))] {
                    let mut g = grant(status);
                    g.is_active = active;
                    g.expires_at = expiry;
                    for p in Permission::ALL {
                        if g.has_permission(p, now) {
                            assert!(g.is_valid_access(now));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_override_replaces_role_defaults() {
        let now = Utc::now();
        let mut g = grant(GrantStatus::Accepted);
        assert!(g.has_permission(Permission::CompleteTasks, now));
        assert!(!g.has_permission(Permission::ExportData, now));

        g.permissions = PermissionSet::from([Permission::ExportData]);
        assert!(g.has_permission(Permission::ExportData, now));
        assert!(!g.has_permission(Permission::CompleteTasks, now));
    }

    #[test]
    fn test_owner_floor_needs_permanent_managing_owner() {
        let now = Utc::now();
        let mut owner = grant(GrantStatus::Accepted);
        owner.role = FarmRole::Owner;
        assert!(owner.holds_owner_floor());

        let mut boxed = owner.clone();
        boxed.expires_at = Some(now + Duration::days(1));
        assert!(boxed.is_active_owner());
        assert!(!boxed.holds_owner_floor());

        let mut narrowed = owner.clone();
        narrowed.permissions = PermissionSet::from([Permission::ViewFarm, Permission::ManageAccess]);
        assert!(!narrowed.holds_owner_floor());
        narrowed.permissions.insert(Permission::ManageRoles);
        assert!(narrowed.holds_owner_floor());

        assert!(!grant(GrantStatus::Accepted).holds_owner_floor());
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let mut g = grant(GrantStatus::Accepted);
        g.expires_at = Some(now);
        assert!(!g.is_valid_access(now));
        assert!(g.is_past_expiry(now));
        g.expires_at = Some(now + Duration::seconds(1));
        assert!(g.is_valid_access(now));
    }

    #[test]
    fn test_terminal_states_reject_every_transition() {
        let now = Utc::now();
        for from in ALL_STATUSES.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL_STATUSES {
                let mut g = grant(from);
                assert!(g.transition(to, now).is_err(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_suspend_restore_revoke() {
        let now = Utc::now();
        let mut g = grant(GrantStatus::Accepted);
        g.transition(GrantStatus::Suspended, now).unwrap();
        assert!(!g.is_valid_access(now));
        assert!(g.is_active);
        g.transition(GrantStatus::Accepted, now).unwrap();
        assert!(g.is_valid_access(now));
        g.transition(GrantStatus::Revoked, now).unwrap();
        assert!(!g.is_active);
        assert!(g.transition(GrantStatus::Accepted, now).is_err());
    }

    #[test]
    fn test_pending_accept_sets_accepted_at() {
        let now = Utc::now();
        let mut g = grant(GrantStatus::Pending);
        assert!(g.accepted_at.is_none());
        assert!(g.transition(GrantStatus::Suspended, now).is_err());
        g.transition(GrantStatus::Accepted, now).unwrap();
        assert_eq!(g.accepted_at, Some(now));
    }
}
