//! The assembled engine.

use std::sync::Arc;

use farmgate_auth::CodeGenerator;
use farmgate_core::AppResult;
use farmgate_core::types::{FarmId, InvitationId, PageResponse, UserId};
use farmgate_entity::audit::{AuditLogEntry, AuditQuery};
use farmgate_entity::invitation::{Invitation, InvitationResponse};
use farmgate_entity::permission::Permission;
use farmgate_entity::grant::AccessGrant;

use crate::access::AccessService;
use crate::audit::AuditTrail;
use crate::bulk::{BulkInvitationCoordinator, BulkInvitationReport, BulkInvitationRequest};
use crate::context::RequestContext;
use crate::deps::EngineDeps;
use crate::invitation::{CreateInvitationRequest, InvitationOutcome, InvitationService};
use crate::permission_request::PermissionRequestService;
use crate::sweep::{ExpirationSweeper, RetentionService, SweepReport};

/// Every service wired over one set of collaborators.
///
/// The common operations are available directly; the services are exposed
/// for the rest.
#[derive(Debug, Clone)]
pub struct AccessEngine {
    deps: EngineDeps,
    /// Membership management.
    pub access: AccessService,
    /// Invitation lifecycle.
    pub invitations: InvitationService,
    /// Bulk fan-out.
    pub bulk: BulkInvitationCoordinator,
    /// Permission requests.
    pub requests: PermissionRequestService,
    /// Audit reads and pruning.
    pub audit: AuditTrail,
    /// Expiration sweep.
    pub sweeper: ExpirationSweeper,
    /// Retention.
    pub retention: RetentionService,
}

impl AccessEngine {
    /// Build the engine with random invitation codes.
    pub fn new(deps: EngineDeps) -> Self {
        let invitations = InvitationService::new(deps.clone());
        Self::assemble(deps, invitations)
    }

    /// Build the engine with a custom invitation code source.
    pub fn with_code_generator(deps: EngineDeps, codes: Arc<dyn CodeGenerator>) -> Self {
        let invitations = InvitationService::with_code_generator(deps.clone(), codes);
        Self::assemble(deps, invitations)
    }

    fn assemble(deps: EngineDeps, invitations: InvitationService) -> Self {
        let access = AccessService::new(deps.clone());
        let requests = PermissionRequestService::new(deps.clone());
        let audit = AuditTrail::new(deps.stores.audit.clone());
        let bulk = BulkInvitationCoordinator::new(deps.clone(), invitations.clone());
        let sweeper = ExpirationSweeper::new(invitations.clone(), access.clone(), requests.clone());
        let retention = RetentionService::new(deps.clone(), audit.clone(), invitations.clone());
        Self {
            deps,
            access,
            invitations,
            bulk,
            requests,
            audit,
            sweeper,
            retention,
        }
    }

    /// The shared collaborators.
    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    pub async fn create_invitation(
        &self,
        ctx: &RequestContext,
        req: CreateInvitationRequest,
    ) -> AppResult<Invitation> {
        self.invitations.create_invitation(ctx, req).await
    }

    pub async fn respond_to_invitation(
        &self,
        ctx: &RequestContext,
        code: &str,
        response: InvitationResponse,
    ) -> AppResult<InvitationOutcome> {
        self.invitations.respond_to_invitation(ctx, code, response).await
    }

    pub async fn send_reminder(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
    ) -> AppResult<Invitation> {
        self.invitations.send_reminder(ctx, invitation_id).await
    }

    pub async fn approve_invitation(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
    ) -> AppResult<Invitation> {
        self.invitations.approve_invitation(ctx, invitation_id).await
    }

    pub async fn revoke_access(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        self.access.revoke_access(ctx, farm_id, user_id, reason).await
    }

    pub async fn suspend_access(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        self.access.suspend_access(ctx, farm_id, user_id, reason).await
    }

    pub async fn restore_access(
        &self,
        ctx: &RequestContext,
        farm_id: FarmId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<AccessGrant> {
        self.access.restore_access(ctx, farm_id, user_id, reason).await
    }

    pub async fn check_permission(
        &self,
        farm_id: FarmId,
        user_id: UserId,
        permission: Permission,
    ) -> AppResult<bool> {
        self.access.check_permission(farm_id, user_id, permission).await
    }

    pub async fn create_bulk_invitation(
        &self,
        ctx: &RequestContext,
        req: BulkInvitationRequest,
    ) -> AppResult<BulkInvitationReport> {
        self.bulk.create_bulk_invitation(ctx, req).await
    }

    /// Audit entries for a farm matching `filters`; the farm always wins
    /// over any farm set in the filters.
    pub async fn get_audit_log(
        &self,
        farm_id: FarmId,
        filters: AuditQuery,
    ) -> AppResult<PageResponse<AuditLogEntry>> {
        let query = AuditQuery {
            farm_id: Some(farm_id),
            ..filters
        };
        self.audit.query(&query).await
    }

    pub async fn run_expiration_sweep(&self) -> AppResult<SweepReport> {
        self.sweeper.run().await
    }
}
