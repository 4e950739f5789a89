//! Access grant management: provisioning, revocation, suspension,
//! restoration, role and permission changes, and permission checks.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use farmgate_core::events::AccessNotification;
use farmgate_core::types::{FarmId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode, ErrorKind};
use farmgate_database::GrantWrite;
use farmgate_entity::audit::{AuditAction, AuditLogEntry, CreateAuditLogEntry};
use farmgate_entity::grant::{AccessGrant, GrantStatus};
use farmgate_entity::permission::{Permission, PermissionSet};
use farmgate_entity::role::FarmRole;

use crate::context::RequestContext;
use crate::deps::EngineDeps;

/// Manages who holds which role on a farm.
#[derive(Debug, Clone)]
pub struct AccessService {
    deps: EngineDeps,
}

impl AccessService {
    /// Creates a new access service.
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Bootstrap the first owner grant of a newly created farm.
    pub async fn provision_owner(&self, farm_id: FarmId, owner_id: UserId) -> AppResult<AccessGrant> {
        self.require_user(owner_id).await?;
        let now = self.deps.now();
        let grant = AccessGrant::new(
            farm_id,
            owner_id,
            FarmRole::Owner,
            owner_id,
            GrantStatus::Accepted,
            now,
        );
        let audit = CreateAuditLogEntry::new(farm_id, owner_id, AuditAction::AccessGranted)
            .target(owner_id)
            .after(FarmRole::Owner, grant.effective_permissions())
            .reason(Some("Farm created".into()))
            .into_entry(now);

        let grant = self.deps.stores.grants.insert_first_grant(grant, audit).await?;
        info!(farm_id = %farm_id, owner_id = %owner_id, "Farm owner provisioned");
        Ok(grant)
    }

    /// Offer a role directly, without an invitation. The grant starts
    /// pending until the user confirms it.
    pub async fn provision_grant(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        role: FarmRole,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        let actor = self.deps.authority(farm_id, ctx.actor_id).await?;
        actor.require(Permission::ManageAccess)?;
        actor.require_manages_member(role)?;
        self.require_user(user_id).await?;

        let now = self.deps.now();
        let grant = AccessGrant::new(farm_id, user_id, role, ctx.actor_id, GrantStatus::Pending, now);
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::AccessGranted)
            .target(user_id)
            .after(role, grant.effective_permissions())
            .reason(reason.clone())
            .into_entry(now);

        let grant = self.deps.stores.grants.insert_grant(grant, audit).await?;
        info!(
            farm_id = %farm_id,
            user_id = %user_id,
            actor_id = %ctx.actor_id,
            role = %role,
            "Access grant provisioned"
        );
        self.notify(ctx, &grant, AuditAction::AccessGranted, reason, now).await;
        Ok(grant)
    }

    /// The acting user accepts a pending grant on a farm.
    pub async fn confirm_pending_grant(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
    ) -> AppResult<AccessGrant> {
        self.respond_to_pending(ctx, farm_id, GrantStatus::Accepted, AuditAction::Accepted)
            .await
    }

    /// The acting user declines a pending grant on a farm.
    pub async fn decline_pending_grant(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
    ) -> AppResult<AccessGrant> {
        self.respond_to_pending(ctx, farm_id, GrantStatus::Rejected, AuditAction::Rejected)
            .await
    }

    async fn respond_to_pending(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        next: GrantStatus,
        action: AuditAction,
    ) -> AppResult<AccessGrant> {
        let current = self.active_grant(farm_id, ctx.actor_id).await?;
        if current.status != GrantStatus::Pending {
            return Err(AppError::invalid_transition(format!(
                "Access grant on farm {farm_id} is {}, not pending",
                current.status
            )));
        }
        let now = self.deps.now();
        let mut next_grant = current.clone();
        next_grant.transition(next, now)?;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, action)
            .target(ctx.actor_id)
            .after(next_grant.role, next_grant.effective_permissions())
            .into_entry(now);

        let stored = self
            .write(current.version, next_grant, false, audit)
            .await?;
        info!(farm_id = %farm_id, user_id = %ctx.actor_id, status = %stored.status, "Pending grant answered");
        Ok(stored)
    }

    /// Permanently remove a member's access.
    pub async fn revoke_access(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        let current = self.managed_grant(ctx, farm_id, user_id, Permission::ManageAccess).await?;
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(GrantStatus::Revoked, now)?;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::AccessRevoked)
            .target(user_id)
            .before(current.role, current.effective_permissions())
            .reason(reason.clone())
            .into_entry(now);

        let stored = self.write(current.version, next, true, audit).await?;
        info!(farm_id = %farm_id, user_id = %user_id, actor_id = %ctx.actor_id, "Access revoked");
        self.notify(ctx, &stored, AuditAction::AccessRevoked, reason, now).await;
        Ok(stored)
    }

    /// Temporarily block a member's access.
    pub async fn suspend_access(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        let current = self.managed_grant(ctx, farm_id, user_id, Permission::ManageAccess).await?;
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(GrantStatus::Suspended, now)?;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::AccessSuspended)
            .target(user_id)
            .before(current.role, current.effective_permissions())
            .after(current.role, PermissionSet::new())
            .reason(reason.clone())
            .into_entry(now);

        let stored = self.write(current.version, next, true, audit).await?;
        info!(farm_id = %farm_id, user_id = %user_id, actor_id = %ctx.actor_id, "Access suspended");
        self.notify(ctx, &stored, AuditAction::AccessSuspended, reason, now).await;
        Ok(stored)
    }

    /// Lift a suspension.
    pub async fn restore_access(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        let current = self.managed_grant(ctx, farm_id, user_id, Permission::ManageAccess).await?;
        if current.status != GrantStatus::Suspended {
            return Err(AppError::invalid_transition(format!(
                "Access grant is {}, only suspended grants can be restored",
                current.status
            )));
        }
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(GrantStatus::Accepted, now)?;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::AccessRestored)
            .target(user_id)
            .before(current.role, PermissionSet::new())
            .after(next.role, next.effective_permissions())
            .reason(reason.clone())
            .into_entry(now);

        let stored = self.write(current.version, next, false, audit).await?;
        info!(farm_id = %farm_id, user_id = %user_id, actor_id = %ctx.actor_id, "Access restored");
        self.notify(ctx, &stored, AuditAction::AccessRestored, reason, now).await;
        Ok(stored)
    }

    /// Move a member to another role. Explicit permission overrides are
    /// cleared so the new role's defaults apply.
    pub async fn change_role(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        new_role: FarmRole,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        let actor = self.deps.authority(farm_id, ctx.actor_id).await?;
        actor.require(Permission::ManageRoles)?;
        let current = self.active_grant(farm_id, user_id).await?;
        actor.require_manages_member(current.role)?;
        actor.require_manages_member(new_role)?;
        if current.role == new_role {
            return Err(AppError::validation(format!("Member already holds role '{new_role}'")));
        }

        let now = self.deps.now();
        let mut next = current.clone();
        next.role = new_role;
        next.permissions = PermissionSet::new();
        next.updated_at = now;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::RoleChanged)
            .target(user_id)
            .before(current.role, current.effective_permissions())
            .after(new_role, next.effective_permissions())
            .reason(reason.clone())
            .into_entry(now);

        let stored = self.write(current.version, next, true, audit).await?;
        info!(
            farm_id = %farm_id,
            user_id = %user_id,
            actor_id = %ctx.actor_id,
            from = %current.role,
            to = %new_role,
            "Role changed"
        );
        self.notify(ctx, &stored, AuditAction::RoleChanged, reason, now).await;
        Ok(stored)
    }

    /// Replace a member's permission override. An empty set falls back to
    /// the role defaults. The last managing owner must keep `ManageAccess`
    /// and `ManageRoles`.
    pub async fn update_permissions(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        permissions: PermissionSet,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        let actor = self.deps.authority(farm_id, ctx.actor_id).await?;
        actor.require(Permission::ManageAccess)?;
        let current = self.active_grant(farm_id, user_id).await?;
        actor.require_manages_member(current.role)?;
        actor.require_delegable(&permissions)?;

        let now = self.deps.now();
        let mut next = current.clone();
        next.permissions = permissions;
        next.updated_at = now;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::PermissionsModified)
            .target(user_id)
            .before(current.role, current.effective_permissions())
            .after(next.role, next.effective_permissions())
            .reason(reason.clone())
            .into_entry(now);

        let stored = self.write(current.version, next, true, audit).await?;
        info!(
            farm_id = %farm_id,
            user_id = %user_id,
            actor_id = %ctx.actor_id,
            permissions = stored.permissions.len(),
            "Permissions updated"
        );
        self.notify(ctx, &stored, AuditAction::PermissionsModified, reason, now).await;
        Ok(stored)
    }

    /// Set or clear the end of a member's validity window. The last
    /// managing owner cannot be time-boxed.
    pub async fn set_expiry(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<AccessGrant> {
        let current = self.managed_grant(ctx, farm_id, user_id, Permission::ManageAccess).await?;
        let now = self.deps.now();
        if expires_at.is_some_and(|at| at <= now) {
            return Err(AppError::validation("Expiry must be in the future"));
        }
        let mut next = current.clone();
        next.expires_at = expires_at;
        next.updated_at = now;
        let audit = CreateAuditLogEntry::new(farm_id, ctx.actor_id, AuditAction::ExpiryChanged)
            .target(user_id)
            .reason(expires_at.map(|at| format!("Expires at {}", at.to_rfc3339())))
            .into_entry(now);

        let stored = self.write(current.version, next, true, audit).await?;
        info!(farm_id = %farm_id, user_id = %user_id, expires_at = ?expires_at, "Grant expiry set");
        Ok(stored)
    }

    /// Check whether a user may exercise a permission on a farm.
    ///
    /// Missing or invalid grants answer `false`; only storage failures are
    /// errors.
    pub async fn check_permission(
        &self,
        farm_id: FarmId,
        user_id: UserId,
        permission: Permission,
    ) -> AppResult<bool> {
        let now = self.deps.now();
        let grants = &self.deps.stores.grants;
        let Some(grant) = self
            .deps
            .read(|| async move { grants.find_active_grant(farm_id, user_id).await })
            .await?
        else {
            return Ok(false);
        };
        if !grant.is_valid_access(now) {
            return Ok(false);
        }

        let allowed = if grant.effective_permissions().contains(permission) {
            true
        } else {
            let requests = &self.deps.stores.requests;
            let temporary = self
                .deps
                .read(|| async move { requests.list_active_requests(farm_id, user_id, now).await })
                .await?;
            self.deps
                .enforcer
                .effective_permissions(&grant, &temporary, now)
                .contains(permission)
        };

        if allowed && self.deps.config.access.touch_last_accessed {
            if let Err(e) = self.deps.stores.grants.touch_grant(grant.id, now).await {
                warn!(grant_id = %grant.id, error = %e, "Failed to record last access");
            }
        }
        debug!(farm_id = %farm_id, user_id = %user_id, %permission, allowed, "Permission checked");
        Ok(allowed)
    }

    /// The user's active grant on a farm, if any.
    pub async fn get_farm_access(
        &self,
        farm_id: FarmId,
        user_id: UserId,
    ) -> AppResult<Option<AccessGrant>> {
        let grants = &self.deps.stores.grants;
        self.deps
            .read(|| async move { grants.find_active_grant(farm_id, user_id).await })
            .await
    }

    /// Active members of a farm.
    pub async fn list_farm_members(&self, farm_id: FarmId) -> AppResult<Vec<AccessGrant>> {
        let grants = &self.deps.stores.grants;
        self.deps
            .read(|| async move { grants.list_farm_grants(farm_id, false).await })
            .await
    }

    /// Farms a user holds an active grant on.
    pub async fn list_user_farms(&self, user_id: UserId) -> AppResult<Vec<AccessGrant>> {
        let grants = &self.deps.stores.grants;
        self.deps
            .read(|| async move { grants.list_user_grants(user_id).await })
            .await
    }

    /// Expire grants whose validity window has closed. Safe to run
    /// concurrently; a grant already moved by another run is skipped.
    pub async fn expire_grants(&self) -> AppResult<u64> {
        let now = self.deps.now();
        let grants = &self.deps.stores.grants;
        let due = self
            .deps
            .read(|| async move { grants.list_grants_past_expiry(now).await })
            .await?;

        let system = RequestContext::system();
        let mut expired = 0;
        for current in due {
            let mut next = current.clone();
            if next.transition(GrantStatus::Expired, now).is_err() {
                continue;
            }
            let audit =
                CreateAuditLogEntry::new(current.farm_id, system.actor_id, AuditAction::AccessExpired)
                    .target(current.user_id)
                    .before(current.role, current.effective_permissions())
                    .into_entry(now);
            match self.write(current.version, next, false, audit).await {
                Ok(stored) => {
                    expired += 1;
                    self.notify(&system, &stored, AuditAction::AccessExpired, None, now)
                        .await;
                }
                Err(e) if e.kind == ErrorKind::Conflict => {
                    debug!(grant_id = %current.id, "Grant changed during sweep, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "Expired access grants");
        }
        Ok(expired)
    }

    async fn require_user(&self, user_id: UserId) -> AppResult<()> {
        if self.deps.directory.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(AppError::not_found(format!("User {user_id} not found")))
        }
    }

    async fn active_grant(&self, farm_id: FarmId, user_id: UserId) -> AppResult<AccessGrant> {
        self.get_farm_access(farm_id, user_id).await?.ok_or_else(|| {
            AppError::coded(
                ErrorCode::GrantNotFound,
                format!("User {user_id} has no access to farm {farm_id}"),
            )
        })
    }

    /// Load the target's grant after checking the actor may manage it.
    async fn managed_grant(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        permission: Permission,
    ) -> AppResult<AccessGrant> {
        let actor = self.deps.authority(farm_id, ctx.actor_id).await?;
        actor.require(permission)?;
        let current = self.active_grant(farm_id, user_id).await?;
        actor.require_manages_member(current.role)?;
        Ok(current)
    }

    async fn write(
        &self,
        expected_version: i64,
        grant: AccessGrant,
        enforce_owner_floor: bool,
        audit: AuditLogEntry,
    ) -> AppResult<AccessGrant> {
        self.deps
            .stores
            .grants
            .update_grant(GrantWrite {
                grant,
                expected_version,
                enforce_owner_floor,
                audit,
            })
            .await
    }

    async fn notify(
        &self,
        ctx: &RequestContext,
        grant: &AccessGrant,
        action: AuditAction,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.deps
            .notifier
            .send(
                at,
                AccessNotification::Changed {
                    farm_id: grant.farm_id,
                    user_id: grant.user_id,
                    actor_id: ctx.actor_id,
                    action: action.as_str().to_string(),
                    reason,
                },
            )
            .await;
    }
}
