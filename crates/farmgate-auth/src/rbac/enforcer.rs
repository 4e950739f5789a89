//! Access enforcement: checks whether an acting user's grant authorizes an
//! operation on a farm.

use chrono::{DateTime, Utc};

use farmgate_core::AppError;
use farmgate_core::result::AppResult;
use farmgate_entity::grant::{AccessGrant, GrantStatus};
use farmgate_entity::permission::{Permission, PermissionSet};
use farmgate_entity::permission_request::PermissionRequest;
use farmgate_entity::role::FarmRole;

/// Stateless checks over access grants.
#[derive(Debug, Clone, Default)]
pub struct AccessEnforcer;

impl AccessEnforcer {
    /// Creates a new enforcer.
    pub fn new() -> Self {
        Self
    }

    /// Checks whether the grant is currently usable.
    pub fn is_valid_access(&self, grant: &AccessGrant, now: DateTime<Utc>) -> bool {
        grant.is_valid_access(now)
    }

    /// Checks a single permission against a grant. Invalid grants authorize
    /// nothing.
    pub fn has_permission(
        &self,
        grant: &AccessGrant,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> bool {
        grant.has_permission(permission, now)
    }

    /// Checks whether the grant may manage members holding `target`.
    pub fn can_manage_role(
        &self,
        grant: &AccessGrant,
        target: FarmRole,
        now: DateTime<Utc>,
    ) -> bool {
        grant.is_valid_access(now) && grant.role.can_manage(&target)
    }

    /// Permissions in force for a grant, widened by temporary requests that
    /// are approved and still open.
    pub fn effective_permissions(
        &self,
        grant: &AccessGrant,
        temporary: &[PermissionRequest],
        now: DateTime<Utc>,
    ) -> PermissionSet {
        if !grant.is_valid_access(now) {
            return PermissionSet::new();
        }
        temporary
            .iter()
            .filter(|r| {
                r.farm_id == grant.farm_id && r.requester_id == grant.user_id && r.is_active_at(now)
            })
            .fold(grant.effective_permissions(), |acc, r| {
                acc.union(&r.requested_permissions)
            })
    }

    /// Resolve the authority an actor holds on a farm.
    ///
    /// Returns `PermissionDenied` when the actor has no grant or the grant
    /// is not valid.
    pub fn authority(
        &self,
        grant: Option<AccessGrant>,
        temporary: &[PermissionRequest],
        now: DateTime<Utc>,
    ) -> AppResult<ActorAuthority> {
        let grant = grant.ok_or_else(|| {
            AppError::permission_denied("You do not have access to this farm")
        })?;
        if !grant.is_valid_access(now) {
            return Err(AppError::permission_denied(format!(
                "Your access to farm {} is {}",
                grant.farm_id,
                if grant.status == GrantStatus::Accepted {
                    "expired"
                } else {
                    grant.status.as_str()
                }
            )));
        }
        let permissions = self.effective_permissions(&grant, temporary, now);
        Ok(ActorAuthority { grant, permissions })
    }
}

/// A validated actor grant together with its effective permissions.
#[derive(Debug, Clone)]
pub struct ActorAuthority {
    grant: AccessGrant,
    permissions: PermissionSet,
}

impl ActorAuthority {
    /// The actor's grant.
    pub fn grant(&self) -> &AccessGrant {
        &self.grant
    }

    /// The actor's role.
    pub fn role(&self) -> FarmRole {
        self.grant.role
    }

    /// Every permission the actor currently holds.
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Checks a single permission.
    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Requires a permission.
    pub fn require(&self, permission: Permission) -> AppResult<()> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(AppError::permission_denied(format!(
                "Role '{}' does not hold permission '{}'",
                self.grant.role, permission
            )))
        }
    }

    /// Requires the actor's role to strictly outrank `target`.
    pub fn require_outranks(&self, target: FarmRole) -> AppResult<()> {
        if self.grant.role.can_manage(&target) {
            Ok(())
        } else {
            Err(AppError::permission_denied(format!(
                "Role '{}' cannot manage role '{}'",
                self.grant.role, target
            )))
        }
    }

    /// Requires authority over a member holding `target`: a strictly
    /// higher rank, or owner acting on owner.
    pub fn require_manages_member(&self, target: FarmRole) -> AppResult<()> {
        if self.grant.role.is_owner() && target.is_owner() {
            return Ok(());
        }
        self.require_outranks(target)
    }

    /// Requires every permission in `requested` to be held by the actor's
    /// own grant. Temporary permissions cannot be handed on.
    pub fn require_delegable(&self, requested: &PermissionSet) -> AppResult<()> {
        let missing = requested.difference(&self.grant.effective_permissions());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::permission_denied(format!(
                "Cannot grant permissions you do not hold: {}",
                missing.names().join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use farmgate_core::ErrorKind;
    use farmgate_core::types::{FarmId, UserId};
    use farmgate_entity::urgency::UrgencyLevel;

    use super::*;

    fn grant(role: FarmRole, status: GrantStatus) -> AccessGrant {
        AccessGrant::new(FarmId::new(), UserId::new(), role, UserId::new(), status, Utc::now())
    }

    #[test]
    fn test_invalid_grants_authorize_nothing() {
        let enforcer = AccessEnforcer::new();
        let now = Utc::now();
        let statuses = [
            GrantStatus::Pending,
            GrantStatus::Suspended,
            GrantStatus::Revoked,
            GrantStatus::Rejected,
            GrantStatus::Expired,
        ];
        for status in statuses {
            let g = grant(FarmRole::Owner, status);
            for p in Permission::ALL {
                assert!(!enforcer.has_permission(&g, p, now), "{status} granted {p}");
            }
            assert!(!enforcer.can_manage_role(&g, FarmRole::Viewer, now));
        }

        let mut expired = grant(FarmRole::Owner, GrantStatus::Accepted);
        expired.expires_at = Some(now - Duration::seconds(1));
        assert!(!enforcer.has_permission(&expired, Permission::ViewFarm, now));
    }

    #[test]
    fn test_override_replaces_role_defaults() {
        let enforcer = AccessEnforcer::new();
        let now = Utc::now();
        let mut g = grant(FarmRole::Viewer, GrantStatus::Accepted);
        assert!(enforcer.has_permission(&g, Permission::ViewFarm, now));
        g.permissions = PermissionSet::from([Permission::ViewRecords]);
        assert!(!enforcer.has_permission(&g, Permission::ViewFarm, now));
        assert!(enforcer.has_permission(&g, Permission::ViewRecords, now));
    }

    #[test]
    fn test_authority_denies_missing_and_suspended_grants() {
        let enforcer = AccessEnforcer::new();
        let now = Utc::now();
        let err = enforcer.authority(None, &[], now).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        let suspended = grant(FarmRole::Manager, GrantStatus::Suspended);
        let err = enforcer.authority(Some(suspended), &[], now).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_outrank_and_delegation() {
        let enforcer = AccessEnforcer::new();
        let now = Utc::now();
        let actor = enforcer
            .authority(Some(grant(FarmRole::Manager, GrantStatus::Accepted)), &[], now)
            .unwrap();
        assert!(actor.require_outranks(FarmRole::Worker).is_ok());
        assert!(actor.require_outranks(FarmRole::Manager).is_err());
        assert!(actor.require_outranks(FarmRole::Owner).is_err());
        assert!(actor.require_manages_member(FarmRole::Owner).is_err());

        let owner = enforcer
            .authority(Some(grant(FarmRole::Owner, GrantStatus::Accepted)), &[], now)
            .unwrap();
        assert!(owner.require_outranks(FarmRole::Owner).is_err());
        assert!(owner.require_manages_member(FarmRole::Owner).is_ok());

        assert!(actor
            .require_delegable(&PermissionSet::from([Permission::ManageFlocks]))
            .is_ok());
        let err = actor
            .require_delegable(&PermissionSet::from([Permission::DeleteFarm]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(err.message.contains("delete_farm"));
    }

    #[test]
    fn test_temporary_permissions_widen_authority() {
        let enforcer = AccessEnforcer::new();
        let now = Utc::now();
        let g = grant(FarmRole::Worker, GrantStatus::Accepted);
        let mut request = PermissionRequest::new(
            g.farm_id,
            g.user_id,
            PermissionSet::from([Permission::ExportData]),
            "quarterly report".into(),
            UrgencyLevel::Medium,
            4,
            now,
        );
        request.approve(UserId::new(), now).unwrap();

        let actor = enforcer.authority(Some(g.clone()), &[request.clone()], now).unwrap();
        assert!(actor.has(Permission::ExportData));
        let err = actor
            .require_delegable(&PermissionSet::from([Permission::ExportData]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(actor
            .require_delegable(&PermissionSet::from([Permission::ViewFarm]))
            .is_ok());

        let later = now + Duration::hours(5);
        let actor = enforcer.authority(Some(g), &[request], later).unwrap();
        assert!(!actor.has(Permission::ExportData));
    }
}
