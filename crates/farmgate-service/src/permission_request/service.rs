//! Temporary permission elevation requests.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use farmgate_core::events::AccessNotification;
use farmgate_core::types::{FarmId, PermissionRequestId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode, ErrorKind};
use farmgate_database::RequestWrite;
use farmgate_entity::audit::{AuditAction, AuditLogEntry, CreateAuditLogEntry};
use farmgate_entity::permission::{Permission, PermissionSet};
use farmgate_entity::permission_request::{PermissionRequest, PermissionRequestStatus};
use farmgate_entity::urgency::UrgencyLevel;

use crate::context::RequestContext;
use crate::deps::EngineDeps;

/// A member asking for extra permissions for a while.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestPermissionsInput {
    /// The farm.
    pub farm_id: FarmId,
    /// Permissions wanted on top of the current grant.
    pub permissions: PermissionSet,
    /// Why they are needed.
    #[validate(length(min = 1, max = 1000, message = "Reason must be 1-1000 characters"))]
    pub reason: String,
    /// How urgent the request is.
    #[serde(default)]
    pub urgency: UrgencyLevel,
    /// Length of the window once approved.
    #[validate(range(min = 1, message = "Duration must be at least one hour"))]
    pub duration_hours: i64,
}

/// Files, reviews, and expires permission requests.
#[derive(Debug, Clone)]
pub struct PermissionRequestService {
    deps: EngineDeps,
}

impl PermissionRequestService {
    /// Creates a permission request service.
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// File a request. The requester needs a valid grant and must ask for
    /// at least one permission they do not already hold.
    pub async fn request_permissions(
        &self,
        ctx: &RequestContext,
        input: RequestPermissionsInput,
    ) -> AppResult<PermissionRequest> {
        input.validate()?;
        let max_hours = self.deps.config.permission_request.max_duration_hours;
        if input.duration_hours > max_hours {
            return Err(AppError::validation(format!(
                "Temporary permissions last at most {max_hours} hours"
            )));
        }
        if input.permissions.is_empty() {
            return Err(AppError::validation("At least one permission must be requested"));
        }

        let actor = self.deps.authority(input.farm_id, ctx.actor_id).await?;
        let missing = input.permissions.difference(actor.permissions());
        if missing.is_empty() {
            return Err(AppError::validation("Every requested permission is already held"));
        }

        let now = self.deps.now();
        let request = PermissionRequest::new(
            input.farm_id,
            ctx.actor_id,
            missing,
            input.reason,
            input.urgency,
            input.duration_hours,
            now,
        );
        let stored = self.deps.stores.requests.insert_request(request).await?;
        info!(
            request_id = %stored.id,
            farm_id = %stored.farm_id,
            requester_id = %ctx.actor_id,
            permissions = stored.requested_permissions.len(),
            urgency = %stored.urgency_level,
            "Permission request filed"
        );
        Ok(stored)
    }

    /// Approve a pending request and open its window.
    ///
    /// The reviewer needs `ManageAccess`, must outrank the requester, and
    /// must hold every requested permission.
    pub async fn approve_request(
        &self,
        ctx: &RequestContext,
        request_id: PermissionRequestId,
    ) -> AppResult<PermissionRequest> {
        let current = self.load(request_id).await?;
        self.require_reviewer(ctx, &current).await?;
        let now = self.deps.now();
        if self.is_pending_too_long(&current, now) {
            self.expire_one(&current, now).await?;
            return Err(AppError::coded(
                ErrorCode::PermissionRequestExpired,
                format!("Permission request {request_id} expired before review"),
            ));
        }

        let mut next = current.clone();
        next.approve(ctx.actor_id, now)?;
        let audit = CreateAuditLogEntry::new(
            current.farm_id,
            ctx.actor_id,
            AuditAction::TemporaryPermissionsGranted,
        )
        .target(current.requester_id)
        .after_permissions(next.requested_permissions.clone())
        .reason(Some(current.reason.clone()))
        .into_entry(now);

        let stored = self.store(current.version, next, Some(audit)).await?;
        info!(
            request_id = %stored.id,
            reviewer_id = %ctx.actor_id,
            expires_at = ?stored.expires_at,
            "Permission request approved"
        );
        self.notify(&stored, now).await;
        Ok(stored)
    }

    /// Decline a pending request.
    pub async fn reject_request(
        &self,
        ctx: &RequestContext,
        request_id: PermissionRequestId,
        note: Option<String>,
    ) -> AppResult<PermissionRequest> {
        let current = self.load(request_id).await?;
        self.require_reviewer(ctx, &current).await?;
        let now = self.deps.now();
        let mut next = current.clone();
        next.reject(ctx.actor_id, note, now)?;
        let stored = self.store(current.version, next, None).await?;
        info!(request_id = %stored.id, reviewer_id = %ctx.actor_id, "Permission request rejected");
        self.notify(&stored, now).await;
        Ok(stored)
    }

    /// Withdraw an approved request before its window closes. The
    /// requester may revoke their own.
    pub async fn revoke_request(
        &self,
        ctx: &RequestContext,
        request_id: PermissionRequestId,
        reason: Option<String>,
    ) -> AppResult<PermissionRequest> {
        let current = self.load(request_id).await?;
        if ctx.actor_id != current.requester_id {
            self.require_reviewer(ctx, &current).await?;
        }
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(PermissionRequestStatus::Revoked, now)?;
        let audit = CreateAuditLogEntry::new(
            current.farm_id,
            ctx.actor_id,
            AuditAction::TemporaryPermissionsRevoked,
        )
        .target(current.requester_id)
        .before_permissions(current.requested_permissions.clone())
        .reason(reason)
        .into_entry(now);

        let stored = self.store(current.version, next, Some(audit)).await?;
        info!(request_id = %stored.id, actor_id = %ctx.actor_id, "Temporary permissions revoked");
        self.notify(&stored, now).await;
        Ok(stored)
    }

    /// Expire approved requests past their window and pending requests
    /// that waited too long. Returns the number expired.
    pub async fn expire_stale(&self) -> AppResult<u64> {
        let now = self.deps.now();
        let cutoff = now - self.pending_ttl();
        let requests = &self.deps.stores.requests;
        let stale = self
            .deps
            .read(|| async move { requests.list_stale_requests(now, cutoff).await })
            .await?;
        let mut expired = 0;
        for request in &stale {
            if self.expire_one(request, now).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Expired permission requests");
        }
        Ok(expired)
    }

    /// A request by id.
    pub async fn get_request(&self, request_id: PermissionRequestId) -> AppResult<PermissionRequest> {
        self.load(request_id).await
    }

    /// Requests on a farm, newest first.
    pub async fn list_for_farm(
        &self,
        farm_id: FarmId,
        status: Option<PermissionRequestStatus>,
    ) -> AppResult<Vec<PermissionRequest>> {
        let requests = &self.deps.stores.requests;
        self.deps
            .read(|| async move { requests.list_farm_requests(farm_id, status).await })
            .await
    }

    /// Requests currently widening a user's permissions.
    pub async fn list_active(
        &self,
        farm_id: FarmId,
        user_id: UserId,
    ) -> AppResult<Vec<PermissionRequest>> {
        let now = self.deps.now();
        let requests = &self.deps.stores.requests;
        self.deps
            .read(|| async move { requests.list_active_requests(farm_id, user_id, now).await })
            .await
    }

    fn pending_ttl(&self) -> Duration {
        Duration::hours(self.deps.config.permission_request.pending_ttl_hours)
    }

    fn is_pending_too_long(&self, request: &PermissionRequest, now: DateTime<Utc>) -> bool {
        request.status == PermissionRequestStatus::Pending && request.is_stale(self.pending_ttl(), now)
    }

    async fn require_reviewer(&self, ctx: &RequestContext, request: &PermissionRequest) -> AppResult<()> {
        if ctx.actor_id == request.requester_id {
            return Err(AppError::coded(
                ErrorCode::SelfApproval,
                format!("Permission request {} cannot be reviewed by its requester", request.id),
            ));
        }
        let reviewer = self.deps.authority(request.farm_id, ctx.actor_id).await?;
        reviewer.require(Permission::ManageAccess)?;

        let grants = &self.deps.stores.grants;
        let (farm_id, requester) = (request.farm_id, request.requester_id);
        let requester_grant = self
            .deps
            .read(|| async move { grants.find_active_grant(farm_id, requester).await })
            .await?
            .ok_or_else(|| {
                AppError::coded(
                    ErrorCode::GrantNotFound,
                    format!("Requester {requester} no longer has access to farm {farm_id}"),
                )
            })?;
        reviewer.require_outranks(requester_grant.role)?;
        reviewer.require_delegable(&request.requested_permissions)
    }

    async fn expire_one(&self, current: &PermissionRequest, now: DateTime<Utc>) -> AppResult<bool> {
        let mut next = current.clone();
        if next.transition(PermissionRequestStatus::Expired, now).is_err() {
            return Ok(false);
        }
        match self.store(current.version, next, None).await {
            Ok(stored) => {
                debug!(request_id = %stored.id, "Permission request expired");
                Ok(true)
            }
            Err(e) if e.kind == ErrorKind::Conflict => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn load(&self, request_id: PermissionRequestId) -> AppResult<PermissionRequest> {
        let requests = &self.deps.stores.requests;
        self.deps
            .read(|| async move { requests.find_request(request_id).await })
            .await?
            .ok_or_else(|| {
                AppError::coded(
                    ErrorCode::PermissionRequestNotFound,
                    format!("Permission request {request_id} not found"),
                )
            })
    }

    async fn store(
        &self,
        expected_version: i64,
        request: PermissionRequest,
        audit: Option<AuditLogEntry>,
    ) -> AppResult<PermissionRequest> {
        self.deps
            .stores
            .requests
            .update_request(RequestWrite {
                request,
                expected_version,
                audit,
            })
            .await
    }

    async fn notify(&self, request: &PermissionRequest, at: DateTime<Utc>) {
        self.deps
            .notifier
            .send(
                at,
                AccessNotification::PermissionRequestReviewed {
                    request_id: request.id,
                    farm_id: request.farm_id,
                    requester_id: request.requester_id,
                    status: request.status.as_str().to_string(),
                },
            )
            .await;
    }
}
