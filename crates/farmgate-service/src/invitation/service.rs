//! Invitation lifecycle: creation, sending, approval, responses, reminders,
//! delivery tracking, expiry, and archival.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use validator::Validate;

use farmgate_auth::{
    ActorAuthority, CodeGenerator, InvitationLinkBuilder, RandomCodeGenerator, normalize_code,
    normalize_email,
};
use farmgate_core::events::InvitationNotification;
use farmgate_core::types::{BulkInvitationId, FarmId, InvitationId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode, ErrorKind};
use farmgate_database::{AcceptInvitation, GrantChange, InvitationWrite};
use farmgate_entity::analytics::AnalyticsEventType;
use farmgate_entity::audit::{AuditAction, AuditLogEntry, CreateAuditLogEntry};
use farmgate_entity::grant::{AccessGrant, GrantStatus};
use farmgate_entity::invitation::{
    Invitation, InvitationResponse, InvitationStatus, NewInvitation,
};
use farmgate_entity::permission::Permission;

use super::request::{CreateInvitationRequest, InvitationOutcome};
use crate::bulk::BulkProgress;
use crate::context::RequestContext;
use crate::deps::EngineDeps;

/// Drives invitations through their state machine.
#[derive(Debug, Clone)]
pub struct InvitationService {
    deps: EngineDeps,
    codes: Arc<dyn CodeGenerator>,
    links: InvitationLinkBuilder,
    progress: BulkProgress,
}

impl InvitationService {
    /// Creates an invitation service with random codes.
    pub fn new(deps: EngineDeps) -> Self {
        Self::with_code_generator(deps, Arc::new(RandomCodeGenerator::new()))
    }

    /// Creates an invitation service with a custom code source.
    pub fn with_code_generator(deps: EngineDeps, codes: Arc<dyn CodeGenerator>) -> Self {
        let links = InvitationLinkBuilder::new(deps.config.invitation.link_base_url.clone());
        let progress = BulkProgress::new(deps.clone());
        Self {
            deps,
            codes,
            links,
            progress,
        }
    }

    fn validity(&self) -> Duration {
        Duration::days(self.deps.config.invitation.expiry_days)
    }

    fn reminder_interval(&self) -> Duration {
        Duration::hours(self.deps.config.invitation.reminder_interval_hours)
    }

    // ── Creation ─────────────────────────────────────────────────

    /// Invite someone to a farm.
    ///
    /// The inviter needs `InviteMembers`, must outrank the proposed role,
    /// and can only pass on permissions they hold.
    pub async fn create_invitation(
        &self,
        ctx: &RequestContext,
        req: CreateInvitationRequest,
    ) -> AppResult<Invitation> {
        self.create(ctx, req, None).await
    }

    pub(crate) async fn create(
        &self,
        ctx: &RequestContext,
        req: CreateInvitationRequest,
        bulk_invitation_id: Option<BulkInvitationId>,
    ) -> AppResult<Invitation> {
        req.validate()?;
        let email = normalize_email(&req.invitee_email)?;
        let max_custom = self.deps.config.invitation.max_custom_permissions;
        if req.custom_permissions.len() > max_custom {
            return Err(AppError::validation(format!(
                "At most {max_custom} custom permissions may be set"
            )));
        }

        let actor = self.deps.authority(req.farm_id, ctx.actor_id).await?;
        actor.require(Permission::InviteMembers)?;
        actor.require_outranks(req.proposed_role)?;
        actor.require_delegable(&req.custom_permissions)?;

        let invitee_user_id = self.deps.directory.resolve_email(&email).await?;
        if let Some(user_id) = invitee_user_id {
            let grants = &self.deps.stores.grants;
            let farm_id = req.farm_id;
            let existing = self
                .deps
                .read(|| async move { grants.find_active_grant(farm_id, user_id).await })
                .await?;
            if existing.is_some() {
                return Err(AppError::coded(
                    ErrorCode::AlreadyMember,
                    format!("{email} is already a member of farm {farm_id}"),
                ));
            }
        }
        if self
            .deps
            .stores
            .invitations
            .find_live_invitation(req.farm_id, &email)
            .await?
            .is_some()
        {
            return Err(AppError::coded(
                ErrorCode::DuplicateInvitation,
                format!("{email} already has a pending invitation to farm {}", req.farm_id),
            ));
        }

        let requires_approval = self.requires_approval(&actor, &req);
        let now = self.deps.now();
        let attempts = self.deps.config.invitation.max_code_attempts.max(1);

        for attempt in 1..=attempts {
            let code = self.codes.generate();
            if self.deps.stores.invitations.code_in_use(&code).await? {
                debug!(attempt, "Invitation code collision, drawing again");
                continue;
            }

            let mut invitation = Invitation::draft(
                NewInvitation {
                    farm_id: req.farm_id,
                    inviter_id: ctx.actor_id,
                    invitee_email: email.clone(),
                    invitee_user_id,
                    proposed_role: req.proposed_role,
                    custom_permissions: req.custom_permissions.clone(),
                    message: req.message.clone(),
                    priority: req.priority,
                    invitation_link: self.links.link_for(&code),
                    invitation_code: code,
                    requires_approval,
                    max_reminders: self.deps.config.invitation.max_reminders,
                    bulk_invitation_id,
                },
                self.validity(),
                now,
            );
            if req.send_immediately {
                self.advance_from_draft(&mut invitation, now)?;
            }

            let mut audit = CreateAuditLogEntry::new(req.farm_id, ctx.actor_id, AuditAction::Invited)
                .target_email(email.clone())
                .after(req.proposed_role, invitation.effective_permissions())
                .invitation(invitation.id);
            if let Some(user_id) = invitee_user_id {
                audit = audit.target(user_id);
            }

            match self
                .deps
                .stores
                .invitations
                .insert_invitation(invitation, Some(audit.into_entry(now)))
                .await
            {
                Ok(stored) => {
                    info!(
                        invitation_id = %stored.id,
                        farm_id = %stored.farm_id,
                        inviter_id = %ctx.actor_id,
                        role = %stored.proposed_role,
                        status = %stored.status,
                        "Invitation created"
                    );
                    self.deps
                        .analytics
                        .record(&stored, AnalyticsEventType::Created, None, now)
                        .await;
                    self.announce(&stored, now).await;
                    return Ok(stored);
                }
                // An uncoded conflict means another writer took the code.
                Err(e) if e.kind == ErrorKind::Conflict && e.code.is_none() => {
                    debug!(attempt, "Invitation code taken concurrently, drawing again");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::conflict(format!(
            "Could not allocate a unique invitation code after {attempts} attempts"
        )))
    }

    fn requires_approval(&self, actor: &ActorAuthority, req: &CreateInvitationRequest) -> bool {
        !actor.role().is_owner()
            && self
                .deps
                .config
                .invitation
                .approval_required_roles
                .iter()
                .any(|r| r.eq_ignore_ascii_case(req.proposed_role.as_str()))
    }

    /// Draft to sent, or to pending approval when gated and unapproved.
    fn advance_from_draft(&self, invitation: &mut Invitation, now: DateTime<Utc>) -> AppResult<()> {
        if invitation.requires_approval && invitation.approved_by.is_none() {
            invitation.transition(InvitationStatus::PendingApproval, now)
        } else {
            invitation.mark_sent(self.validity(), now)
        }
    }

    /// Send a draft.
    pub async fn send_invitation(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
    ) -> AppResult<Invitation> {
        let current = self.load(invitation_id).await?;
        self.require_invitation_manager(ctx, &current).await?;
        if current.status != InvitationStatus::Draft {
            return Err(self.not_in_state(&current, "a draft"));
        }

        let now = self.deps.now();
        let mut next = current.clone();
        self.advance_from_draft(&mut next, now)?;
        let stored = self.store(current.version, next, None).await?;
        info!(invitation_id = %stored.id, status = %stored.status, "Invitation sent");
        self.announce(&stored, now).await;
        Ok(stored)
    }

    /// Analytics and notifications for an invitation that just left draft.
    async fn announce(&self, invitation: &Invitation, now: DateTime<Utc>) {
        match invitation.status {
            InvitationStatus::Sent => {
                self.deps
                    .analytics
                    .record(invitation, AnalyticsEventType::Sent, None, now)
                    .await;
                self.deps
                    .notifier
                    .send(
                        now,
                        InvitationNotification::Sent {
                            invitation_id: invitation.id,
                            farm_id: invitation.farm_id,
                            invitee_email: invitation.invitee_email.clone(),
                            inviter_id: invitation.inviter_id,
                            role: invitation.proposed_role.as_str().to_string(),
                            link: invitation.invitation_link.clone(),
                            expires_at: invitation.expires_at,
                            message: invitation.message.clone(),
                        },
                    )
                    .await;
            }
            InvitationStatus::PendingApproval => {
                self.deps
                    .notifier
                    .send(
                        now,
                        InvitationNotification::ApprovalRequested {
                            invitation_id: invitation.id,
                            farm_id: invitation.farm_id,
                            inviter_id: invitation.inviter_id,
                            role: invitation.proposed_role.as_str().to_string(),
                        },
                    )
                    .await;
            }
            _ => {}
        }
    }

    // ── Approval ─────────────────────────────────────────────────

    /// Approve a gated invitation and send it. The sending window starts at
    /// approval time.
    pub async fn approve_invitation(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
    ) -> AppResult<Invitation> {
        let current = self.load(invitation_id).await?;
        self.require_approver(ctx, &current).await?;
        let now = self.deps.now();
        if current.status == InvitationStatus::PendingApproval && current.is_past_expiry(now) {
            self.expire_one(&current, now).await?;
            return Err(expired_error(&current));
        }

        let mut next = current.clone();
        next.approve(ctx.actor_id, self.validity(), now)?;
        let audit = CreateAuditLogEntry::new(current.farm_id, ctx.actor_id, AuditAction::InvitationApproved)
            .target_email(current.invitee_email.clone())
            .after(current.proposed_role, current.effective_permissions())
            .invitation(current.id)
            .into_entry(now);
        let stored = self.store(current.version, next, Some(audit)).await?;
        info!(invitation_id = %stored.id, approver_id = %ctx.actor_id, "Invitation approved");
        self.announce(&stored, now).await;
        Ok(stored)
    }

    /// Refuse a gated invitation. It moves to cancelled.
    pub async fn deny_approval(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
        reason: Option<String>,
    ) -> AppResult<Invitation> {
        let current = self.load(invitation_id).await?;
        self.require_approver(ctx, &current).await?;
        if current.status != InvitationStatus::PendingApproval {
            return Err(self.not_in_state(&current, "awaiting approval"));
        }
        let stored = self.cancel(ctx, current, reason).await?;
        info!(invitation_id = %stored.id, approver_id = %ctx.actor_id, "Invitation approval denied");
        Ok(stored)
    }

    /// Approvers need `ManageAccess`, must outrank the proposed role, and
    /// cannot approve their own invitation.
    async fn require_approver(&self, ctx: &RequestContext, invitation: &Invitation) -> AppResult<()> {
        if ctx.actor_id == invitation.inviter_id {
            return Err(AppError::coded(
                ErrorCode::SelfApproval,
                format!("Invitation {} cannot be approved by its inviter", invitation.id),
            ));
        }
        let actor = self.deps.authority(invitation.farm_id, ctx.actor_id).await?;
        actor.require(Permission::ManageAccess)?;
        actor.require_outranks(invitation.proposed_role)
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Withdraw an invitation that has not been answered.
    pub async fn cancel_invitation(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
        reason: Option<String>,
    ) -> AppResult<Invitation> {
        let current = self.load(invitation_id).await?;
        self.require_invitation_manager(ctx, &current).await?;
        let stored = self.cancel(ctx, current, reason).await?;
        info!(invitation_id = %stored.id, actor_id = %ctx.actor_id, "Invitation cancelled");
        Ok(stored)
    }

    async fn cancel(
        &self,
        ctx: &RequestContext,
        current: Invitation,
        reason: Option<String>,
    ) -> AppResult<Invitation> {
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(InvitationStatus::Cancelled, now)?;
        let audit = CreateAuditLogEntry::new(current.farm_id, ctx.actor_id, AuditAction::InvitationCancelled)
            .target_email(current.invitee_email.clone())
            .before(current.proposed_role, current.effective_permissions())
            .reason(reason)
            .invitation(current.id)
            .into_entry(now);
        let stored = self.store(current.version, next, Some(audit)).await?;
        self.resolved(&stored, AnalyticsEventType::Cancelled, now).await;
        Ok(stored)
    }

    /// The inviter may manage their own invitation; anyone else needs
    /// `ManageAccess` and must outrank the proposed role.
    async fn require_invitation_manager(
        &self,
        ctx: &RequestContext,
        invitation: &Invitation,
    ) -> AppResult<()> {
        let actor = self.deps.authority(invitation.farm_id, ctx.actor_id).await?;
        if ctx.actor_id == invitation.inviter_id {
            return Ok(());
        }
        actor.require(Permission::ManageAccess)?;
        actor.require_outranks(invitation.proposed_role)
    }

    // ── Responses ────────────────────────────────────────────────

    /// Accept or decline an invitation by code. The acting user must be the
    /// invitee.
    ///
    /// Acceptance creates or activates the grant in the same transaction
    /// that moves the invitation to accepted. A concurrent duplicate loses
    /// with `InvitationAlreadyResponded`.
    pub async fn respond_to_invitation(
        &self,
        ctx: &RequestContext,
        code: &str,
        response: InvitationResponse,
    ) -> AppResult<InvitationOutcome> {
        let current = self.load_by_code(code).await?;
        self.require_invitee(ctx, &current).await?;
        let now = self.deps.now();
        self.require_answerable(&current, now).await?;

        match response {
            InvitationResponse::Accept => self.accept(ctx, current, now).await,
            InvitationResponse::Reject => self.reject(ctx, current, now).await,
        }
    }

    async fn require_invitee(&self, ctx: &RequestContext, invitation: &Invitation) -> AppResult<()> {
        if invitation.invitee_user_id == Some(ctx.actor_id) {
            return Ok(());
        }
        let email = self.deps.directory.email_of(ctx.actor_id).await?;
        match email {
            Some(email) if email.eq_ignore_ascii_case(&invitation.invitee_email) => Ok(()),
            _ => Err(AppError::permission_denied(
                "This invitation was addressed to someone else",
            )),
        }
    }

    /// Fails unless the invitation can be answered right now. An outstanding
    /// invitation found past its expiry is expired on the spot.
    async fn require_answerable(&self, invitation: &Invitation, now: DateTime<Utc>) -> AppResult<()> {
        match invitation.status {
            InvitationStatus::Expired => Err(expired_error(invitation)),
            status if status.is_terminal() => Err(already_responded(invitation)),
            InvitationStatus::PendingApproval if invitation.is_past_expiry(now) => {
                self.expire_one(invitation, now).await?;
                Err(expired_error(invitation))
            }
            InvitationStatus::PendingApproval => Err(AppError::coded(
                ErrorCode::ApprovalRequired,
                format!("Invitation {} is waiting for approval", invitation.id),
            )),
            InvitationStatus::Draft => Err(AppError::invalid_transition(format!(
                "Invitation {} has not been sent",
                invitation.id
            ))),
            _ if invitation.is_past_expiry(now) => {
                self.expire_one(invitation, now).await?;
                Err(expired_error(invitation))
            }
            _ if invitation.requires_approval && invitation.approved_by.is_none() => {
                Err(AppError::coded(
                    ErrorCode::ApprovalRequired,
                    format!("Invitation {} is waiting for approval", invitation.id),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn accept(
        &self,
        ctx: &RequestContext,
        current: Invitation,
        now: DateTime<Utc>,
    ) -> AppResult<InvitationOutcome> {
        let user_id = ctx.actor_id;
        let mut accepted = current.clone();
        accepted.transition(InvitationStatus::Accepted, now)?;
        accepted.invitee_user_id = Some(user_id);

        let grants = &self.deps.stores.grants;
        let farm_id = current.farm_id;
        let existing = self
            .deps
            .read(|| async move { grants.find_active_grant(farm_id, user_id).await })
            .await?;
        let grant_change = match existing {
            Some(mut grant) if grant.status == GrantStatus::Pending => {
                let expected_version = grant.version;
                grant.transition(GrantStatus::Accepted, now)?;
                grant.role = current.proposed_role;
                grant.permissions = current.custom_permissions.clone();
                grant.invitation_id = Some(current.id);
                GrantChange::Update {
                    grant,
                    expected_version,
                }
            }
            Some(_) => {
                let member = AppError::coded(
                    ErrorCode::AlreadyMember,
                    format!("User {user_id} is already a member of farm {farm_id}"),
                );
                // A duplicate accept that lost the race sees the winner's grant.
                return Err(self.explain_lost_race(current.id, member).await);
            }
            None => {
                let mut grant = AccessGrant::new(
                    farm_id,
                    user_id,
                    current.proposed_role,
                    current.inviter_id,
                    GrantStatus::Accepted,
                    now,
                );
                grant.permissions = current.custom_permissions.clone();
                grant.invited_at = current.sent_at.unwrap_or(current.created_at);
                grant.invitation_id = Some(current.id);
                GrantChange::Insert(grant)
            }
        };

        let audit = CreateAuditLogEntry::new(farm_id, user_id, AuditAction::Accepted)
            .target(user_id)
            .target_email(current.invitee_email.clone())
            .after(current.proposed_role, current.effective_permissions())
            .invitation(current.id)
            .into_entry(now);

        let result = self
            .deps
            .stores
            .invitations
            .accept_invitation(AcceptInvitation {
                invitation: accepted,
                expected_version: current.version,
                grant: grant_change,
                audit: vec![audit],
            })
            .await;

        let (invitation, grant) = match result {
            Ok(pair) => pair,
            Err(e) if e.kind == ErrorKind::Conflict && (e.code.is_none() || e.is(ErrorCode::AlreadyMember)) => {
                return Err(self.explain_lost_race(current.id, e).await);
            }
            Err(e) if e.is_retryable() => {
                // The commit may have landed before the failure surfaced.
                return self.reconcile_accept(current.id, user_id, e).await;
            }
            Err(e) => return Err(e),
        };

        info!(
            invitation_id = %invitation.id,
            farm_id = %farm_id,
            user_id = %user_id,
            role = %grant.role,
            "Invitation accepted"
        );
        self.resolved(&invitation, AnalyticsEventType::Accepted, now).await;
        Ok(InvitationOutcome {
            invitation,
            grant: Some(grant),
        })
    }

    async fn reject(
        &self,
        ctx: &RequestContext,
        current: Invitation,
        now: DateTime<Utc>,
    ) -> AppResult<InvitationOutcome> {
        let mut next = current.clone();
        next.transition(InvitationStatus::Rejected, now)?;
        next.invitee_user_id = Some(ctx.actor_id);
        let audit = CreateAuditLogEntry::new(current.farm_id, ctx.actor_id, AuditAction::Rejected)
            .target(ctx.actor_id)
            .target_email(current.invitee_email.clone())
            .invitation(current.id)
            .into_entry(now);

        let invitation = match self.store(current.version, next, Some(audit)).await {
            Ok(stored) => stored,
            Err(e) if e.kind == ErrorKind::Conflict && e.code.is_none() => {
                return Err(self.explain_lost_race(current.id, e).await);
            }
            Err(e) => return Err(e),
        };
        info!(invitation_id = %invitation.id, user_id = %ctx.actor_id, "Invitation rejected");
        self.resolved(&invitation, AnalyticsEventType::Rejected, now).await;
        Ok(InvitationOutcome {
            invitation,
            grant: None,
        })
    }

    /// Turn a lost compare-and-set into the error the caller should see.
    async fn explain_lost_race(&self, invitation_id: InvitationId, lost: AppError) -> AppError {
        match self.find(invitation_id).await {
            Ok(Some(inv)) if inv.status == InvitationStatus::Expired => expired_error(&inv),
            Ok(Some(inv)) if inv.status.is_terminal() => already_responded(&inv),
            _ => lost,
        }
    }

    /// After a storage failure on accept, check whether the acceptance
    /// committed anyway.
    async fn reconcile_accept(
        &self,
        invitation_id: InvitationId,
        user_id: UserId,
        failure: AppError,
    ) -> AppResult<InvitationOutcome> {
        warn!(invitation_id = %invitation_id, error = %failure, "Accept failed, checking stored state");
        let Some(invitation) = self.find(invitation_id).await? else {
            return Err(failure);
        };
        if invitation.status != InvitationStatus::Accepted
            || invitation.invitee_user_id != Some(user_id)
        {
            return Err(failure);
        }
        let grants = &self.deps.stores.grants;
        let farm_id = invitation.farm_id;
        let grant = self
            .deps
            .read(|| async move { grants.find_active_grant(farm_id, user_id).await })
            .await?;
        match grant {
            Some(grant) => {
                info!(invitation_id = %invitation_id, user_id = %user_id, "Acceptance had committed");
                let now = self.deps.now();
                self.resolved(&invitation, AnalyticsEventType::Accepted, now).await;
                Ok(InvitationOutcome {
                    invitation,
                    grant: Some(grant),
                })
            }
            None => Err(failure),
        }
    }

    /// Side effects of an invitation reaching a terminal state.
    async fn resolved(&self, invitation: &Invitation, event: AnalyticsEventType, now: DateTime<Utc>) {
        self.deps.analytics.record(invitation, event, None, now).await;
        if let Some(bulk_id) = invitation.bulk_invitation_id {
            self.progress
                .record_resolution(bulk_id, invitation.status, now)
                .await;
        }
        self.deps
            .notifier
            .send(
                now,
                InvitationNotification::StatusChanged {
                    invitation_id: invitation.id,
                    farm_id: invitation.farm_id,
                    inviter_id: invitation.inviter_id,
                    status: invitation.status.as_str().to_string(),
                },
            )
            .await;
    }

    // ── Reminders ────────────────────────────────────────────────

    /// Send a reminder for an outstanding invitation.
    pub async fn send_reminder(
        &self,
        ctx: &RequestContext,
        invitation_id: InvitationId,
    ) -> AppResult<Invitation> {
        let current = self.load(invitation_id).await?;
        self.require_invitation_manager(ctx, &current).await?;
        let now = self.deps.now();
        if !current.is_valid(now) {
            return Err(match current.status {
                InvitationStatus::Expired => expired_error(&current),
                s if s.is_terminal() => already_responded(&current),
                s if s.is_outstanding() => expired_error(&current),
                _ => self.not_in_state(&current, "outstanding"),
            });
        }
        if !current.can_send_reminder(now, self.reminder_interval()) {
            return Err(AppError::coded(
                ErrorCode::ReminderThrottled,
                format!(
                    "Invitation {} has {} of {} reminders sent; the next one is not due yet",
                    current.id, current.reminders_sent, current.max_reminders
                ),
            ));
        }
        self.remind(current, now).await
    }

    async fn remind(&self, current: Invitation, now: DateTime<Utc>) -> AppResult<Invitation> {
        let mut next = current.clone();
        next.record_reminder(now)?;
        let stored = self.store(current.version, next, None).await?;
        info!(
            invitation_id = %stored.id,
            reminder = stored.reminders_sent,
            max = stored.max_reminders,
            "Invitation reminder sent"
        );
        self.deps
            .analytics
            .record(
                &stored,
                AnalyticsEventType::ReminderSent,
                Some(json!({ "reminder_number": stored.reminders_sent })),
                now,
            )
            .await;
        self.deps
            .notifier
            .send(
                now,
                InvitationNotification::Reminder {
                    invitation_id: stored.id,
                    invitee_email: stored.invitee_email.clone(),
                    link: stored.invitation_link.clone(),
                    reminder_number: stored.reminders_sent,
                    expires_at: stored.expires_at,
                },
            )
            .await;
        Ok(stored)
    }

    /// Outstanding invitations eligible for a reminder now.
    pub async fn remindable_invitations(&self) -> AppResult<Vec<Invitation>> {
        let now = self.deps.now();
        let interval = self.reminder_interval();
        let invitations = &self.deps.stores.invitations;
        let outstanding = self
            .deps
            .read(|| async move { invitations.list_outstanding_invitations(now).await })
            .await?;
        Ok(outstanding
            .into_iter()
            .filter(|inv| inv.can_send_reminder(now, interval))
            .collect())
    }

    /// Send every due reminder. Invitations changed concurrently are skipped.
    pub async fn send_due_reminders(&self) -> AppResult<u64> {
        let now = self.deps.now();
        let mut sent = 0;
        for invitation in self.remindable_invitations().await? {
            let id = invitation.id;
            match self.remind(invitation, now).await {
                Ok(_) => sent += 1,
                Err(e) if e.kind == ErrorKind::Conflict || e.kind == ErrorKind::Throttled => {
                    debug!(invitation_id = %id, "Reminder skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if sent > 0 {
            info!(sent, "Sent due reminders");
        }
        Ok(sent)
    }

    // ── Delivery tracking ────────────────────────────────────────

    /// The transport confirmed delivery. Advisory: later states are left
    /// alone.
    pub async fn mark_delivered(&self, invitation_id: InvitationId) -> AppResult<Invitation> {
        let current = self.load(invitation_id).await?;
        if current.status != InvitationStatus::Sent {
            debug!(invitation_id = %invitation_id, status = %current.status, "Delivery receipt ignored");
            return Ok(current);
        }
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(InvitationStatus::Delivered, now)?;
        let stored = self.store(current.version, next, None).await?;
        debug!(invitation_id = %stored.id, "Invitation delivered");
        self.deps
            .analytics
            .record(&stored, AnalyticsEventType::Delivered, None, now)
            .await;
        Ok(stored)
    }

    /// The invitee opened the message.
    pub async fn mark_opened(&self, code: &str) -> AppResult<Invitation> {
        let current = self.load_by_code(code).await?;
        if !matches!(
            current.status,
            InvitationStatus::Sent | InvitationStatus::Delivered
        ) {
            return Ok(current);
        }
        let now = self.deps.now();
        let mut next = current.clone();
        next.transition(InvitationStatus::Opened, now)?;
        let stored = self.store(current.version, next, None).await?;
        debug!(invitation_id = %stored.id, "Invitation opened");
        self.deps
            .analytics
            .record(&stored, AnalyticsEventType::Opened, None, now)
            .await;
        Ok(stored)
    }

    /// The invitee followed the link.
    pub async fn record_link_click(&self, code: &str) -> AppResult<()> {
        let invitation = self.load_by_code(code).await?;
        let now = self.deps.now();
        self.deps
            .analytics
            .record(&invitation, AnalyticsEventType::Clicked, None, now)
            .await;
        Ok(())
    }

    /// The invitation page was viewed.
    pub async fn record_view(&self, code: &str) -> AppResult<()> {
        let invitation = self.load_by_code(code).await?;
        let now = self.deps.now();
        self.deps
            .analytics
            .record(&invitation, AnalyticsEventType::Viewed, None, now)
            .await;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// An invitation by id.
    pub async fn get_invitation(&self, invitation_id: InvitationId) -> AppResult<Invitation> {
        self.load(invitation_id).await
    }

    /// An invitation by code.
    pub async fn get_invitation_by_code(&self, code: &str) -> AppResult<Invitation> {
        self.load_by_code(code).await
    }

    /// Invitations for a farm, newest first.
    pub async fn list_for_farm(
        &self,
        farm_id: FarmId,
        status: Option<InvitationStatus>,
    ) -> AppResult<Vec<Invitation>> {
        let invitations = &self.deps.stores.invitations;
        self.deps
            .read(|| async move { invitations.list_farm_invitations(farm_id, status).await })
            .await
    }

    /// Invitations addressed to an email, newest first.
    pub async fn list_for_email(&self, email: &str) -> AppResult<Vec<Invitation>> {
        let email = normalize_email(email)?;
        let invitations = &self.deps.stores.invitations;
        let email = email.as_str();
        self.deps
            .read(|| async move { invitations.list_email_invitations(email).await })
            .await
    }

    // ── Sweeps ───────────────────────────────────────────────────

    /// Expire every outstanding or gated invitation past its expiry.
    /// Idempotent; rows moved by a concurrent run are skipped.
    pub async fn expire_invitations(&self) -> AppResult<u64> {
        let now = self.deps.now();
        let invitations = &self.deps.stores.invitations;
        let due = self
            .deps
            .read(|| async move { invitations.list_expirable_invitations(now).await })
            .await?;
        let mut expired = 0;
        for invitation in &due {
            if self.expire_one(invitation, now).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Expired invitations");
        }
        Ok(expired)
    }

    /// Move one invitation to expired. Returns `false` if another writer
    /// changed it first.
    async fn expire_one(&self, current: &Invitation, now: DateTime<Utc>) -> AppResult<bool> {
        let mut next = current.clone();
        if next.transition(InvitationStatus::Expired, now).is_err() {
            return Ok(false);
        }
        match self.store(current.version, next, None).await {
            Ok(stored) => {
                debug!(invitation_id = %stored.id, "Invitation expired");
                self.resolved(&stored, AnalyticsEventType::Expired, now).await;
                Ok(true)
            }
            Err(e) if e.kind == ErrorKind::Conflict => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stamp terminal invitations past the archive window.
    pub async fn archive_invitations(&self) -> AppResult<u64> {
        let now = self.deps.now();
        let cutoff = now - Duration::days(self.deps.config.invitation.archive_after_days);
        let invitations = &self.deps.stores.invitations;
        let due = self
            .deps
            .read(|| async move { invitations.list_archivable_invitations(cutoff).await })
            .await?;
        let mut archived = 0;
        for current in due {
            let mut next = current.clone();
            next.archived_at = Some(now);
            next.updated_at = now;
            match self.store(current.version, next, None).await {
                Ok(_) => archived += 1,
                Err(e) if e.kind == ErrorKind::Conflict => {}
                Err(e) => return Err(e),
            }
        }
        if archived > 0 {
            info!(archived, "Archived invitations");
        }
        Ok(archived)
    }

    // ── Helpers ──────────────────────────────────────────────────

    async fn find(&self, invitation_id: InvitationId) -> AppResult<Option<Invitation>> {
        let invitations = &self.deps.stores.invitations;
        self.deps
            .read(|| async move { invitations.find_invitation(invitation_id).await })
            .await
    }

    async fn load(&self, invitation_id: InvitationId) -> AppResult<Invitation> {
        self.find(invitation_id).await?.ok_or_else(|| {
            AppError::coded(
                ErrorCode::InvitationNotFound,
                format!("Invitation {invitation_id} not found"),
            )
        })
    }

    async fn load_by_code(&self, code: &str) -> AppResult<Invitation> {
        let code = normalize_code(code);
        let invitations = &self.deps.stores.invitations;
        let lookup = code.as_str();
        self.deps
            .read(|| async move { invitations.find_invitation_by_code(lookup).await })
            .await?
            .ok_or_else(|| {
                AppError::coded(
                    ErrorCode::InvitationNotFound,
                    format!("No invitation with code {code}"),
                )
            })
    }

    async fn store(
        &self,
        expected_version: i64,
        invitation: Invitation,
        audit: Option<AuditLogEntry>,
    ) -> AppResult<Invitation> {
        self.deps
            .stores
            .invitations
            .update_invitation(InvitationWrite {
                invitation,
                expected_version,
                audit,
            })
            .await
    }

    fn not_in_state(&self, invitation: &Invitation, wanted: &str) -> AppError {
        if invitation.status.is_terminal() {
            already_responded(invitation)
        } else {
            AppError::invalid_transition(format!(
                "Invitation {} is {}, not {wanted}",
                invitation.id, invitation.status
            ))
        }
    }
}

fn expired_error(invitation: &Invitation) -> AppError {
    AppError::coded(
        ErrorCode::InvitationExpired,
        format!("Invitation {} expired at {}", invitation.id, invitation.expires_at.to_rfc3339()),
    )
}

fn already_responded(invitation: &Invitation) -> AppError {
    AppError::coded(
        ErrorCode::InvitationAlreadyResponded,
        format!("Invitation {} is already {}", invitation.id, invitation.status),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use farmgate_core::events::NotificationPayload;
    use farmgate_core::traits::Clock;
    use farmgate_entity::role::FarmRole;

    use super::*;
    use crate::testing::Harness;

    /// Hands out a fixed sequence of codes, then repeats the last.
    #[derive(Debug)]
    struct ScriptedCodes(Mutex<Vec<&'static str>>);

    impl CodeGenerator for ScriptedCodes {
        fn generate(&self) -> String {
            let mut codes = self.0.lock().unwrap();
            if codes.len() > 1 {
                codes.remove(0).to_string()
            } else {
                codes[0].to_string()
            }
        }
    }

    fn invite(h: &Harness, email: &str, role: FarmRole) -> CreateInvitationRequest {
        CreateInvitationRequest::new(h.farm_id, email, role)
    }

    #[tokio::test]
    async fn test_code_collision_draws_again() {
        let h = Harness::new().await;
        let service = InvitationService::with_code_generator(
            h.engine.deps().clone(),
            Arc::new(ScriptedCodes(Mutex::new(vec!["AAAA1111", "AAAA1111", "BBBB2222"]))),
        );
        let ctx = h.owner_ctx();
        let first = service
            .create_invitation(&ctx, invite(&h, "a@x.com", FarmRole::Worker))
            .await
            .unwrap();
        let second = service
            .create_invitation(&ctx, invite(&h, "b@x.com", FarmRole::Worker))
            .await
            .unwrap();
        assert_eq!(first.invitation_code, "AAAA1111");
        assert_eq!(second.invitation_code, "BBBB2222");
        assert!(second.invitation_link.ends_with("/BBBB2222"));

        let err = service
            .create_invitation(&ctx, invite(&h, "c@x.com", FarmRole::Worker))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_duplicate_and_member_guards() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        h.engine
            .create_invitation(&ctx, invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        let err = h
            .engine
            .create_invitation(&ctx, invite(&h, "  BOB@x.com ", FarmRole::Viewer))
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::DuplicateInvitation));

        h.add_member("carol@x.com", FarmRole::Worker).await;
        let err = h
            .engine
            .create_invitation(&ctx, invite(&h, "carol@x.com", FarmRole::Viewer))
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::AlreadyMember));

        let err = h
            .engine
            .create_invitation(&ctx, invite(&h, "not an email", FarmRole::Viewer))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_inviter_must_outrank_and_hold_permissions() {
        let h = Harness::new().await;
        let manager = h.add_member("manager@x.com", FarmRole::Manager).await;
        let ctx = RequestContext::new(manager);

        let err = h
            .engine
            .create_invitation(&ctx, invite(&h, "peer@x.com", FarmRole::Manager))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        let mut req = invite(&h, "w@x.com", FarmRole::Worker);
        req.custom_permissions = [Permission::ManageSettings].into();
        let err = h.engine.create_invitation(&ctx, req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_gated_invitation_needs_another_approver() {
        let mut config = farmgate_core::config::AppConfig::default();
        config.analytics.inline = true;
        config.invitation.approval_required_roles = vec!["supervisor".into()];
        let mut h = Harness::with_config(config).await;
        let manager = h.add_member("manager@x.com", FarmRole::Manager).await;
        let invitee = h.directory.register("sup@x.com").await;
        let manager_ctx = RequestContext::new(manager);

        let gated = h
            .engine
            .create_invitation(&manager_ctx, invite(&h, "sup@x.com", FarmRole::Supervisor))
            .await
            .unwrap();
        assert_eq!(gated.status, InvitationStatus::PendingApproval);
        assert!(h.drain_notifications().iter().any(|n| matches!(
            n.payload,
            NotificationPayload::Invitation(InvitationNotification::ApprovalRequested { .. })
        )));

        let err = h
            .engine
            .respond_to_invitation(
                &RequestContext::new(invitee),
                &gated.invitation_code,
                InvitationResponse::Accept,
            )
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::ApprovalRequired));

        let err = h
            .engine
            .approve_invitation(&manager_ctx, gated.id)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::SelfApproval));

        h.clock.advance(Duration::days(2));
        let approved = h
            .engine
            .approve_invitation(&h.owner_ctx(), gated.id)
            .await
            .unwrap();
        assert_eq!(approved.status, InvitationStatus::Sent);
        assert_eq!(approved.approved_by, Some(h.owner));
        assert_eq!(approved.expires_at, h.clock.now() + Duration::days(7));

        let outcome = h
            .engine
            .respond_to_invitation(
                &RequestContext::new(invitee),
                &gated.invitation_code,
                InvitationResponse::Accept,
            )
            .await
            .unwrap();
        assert_eq!(outcome.grant.map(|g| g.role), Some(FarmRole::Supervisor));
    }

    #[tokio::test]
    async fn test_denied_approval_cancels() {
        let mut config = farmgate_core::config::AppConfig::default();
        config.analytics.inline = true;
        config.invitation.approval_required_roles = vec!["worker".into()];
        let h = Harness::with_config(config).await;
        let manager = h.add_member("manager@x.com", FarmRole::Manager).await;
        let gated = h
            .engine
            .create_invitation(&RequestContext::new(manager), invite(&h, "w@x.com", FarmRole::Worker))
            .await
            .unwrap();

        let denied = h
            .engine
            .invitations
            .deny_approval(&h.owner_ctx(), gated.id, Some("not hiring".into()))
            .await
            .unwrap();
        assert_eq!(denied.status, InvitationStatus::Cancelled);
        assert!(denied.responded_at.is_some());

        let err = h
            .engine
            .invitations
            .deny_approval(&h.owner_ctx(), gated.id, None)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::InvitationAlreadyResponded));
    }

    #[tokio::test]
    async fn test_drafts_are_sent_explicitly() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        let mut req = invite(&h, "draft@x.com", FarmRole::Viewer);
        req.send_immediately = false;
        let draft = h.engine.create_invitation(&ctx, req).await.unwrap();
        assert_eq!(draft.status, InvitationStatus::Draft);
        assert!(draft.sent_at.is_none());

        h.clock.advance(Duration::hours(5));
        let sent = h.engine.invitations.send_invitation(&ctx, draft.id).await.unwrap();
        assert_eq!(sent.status, InvitationStatus::Sent);
        assert_eq!(sent.sent_at, Some(h.clock.now()));
        assert_eq!(sent.expires_at, h.clock.now() + Duration::days(7));

        let err = h.engine.invitations.send_invitation(&ctx, draft.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidStateTransition);
    }

    #[tokio::test]
    async fn test_only_the_invitee_can_respond() {
        let h = Harness::new().await;
        h.directory.register("bob@x.com").await;
        let mallory = h.directory.register("mallory@x.com").await;
        let invitation = h
            .engine
            .create_invitation(&h.owner_ctx(), invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        let err = h
            .engine
            .respond_to_invitation(
                &RequestContext::new(mallory),
                &invitation.invitation_code,
                InvitationResponse::Accept,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert_eq!(
            h.engine.invitations.get_invitation(invitation.id).await.unwrap().status,
            InvitationStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_rejection_and_cancellation_are_terminal() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        let bob = h.directory.register("bob@x.com").await;
        let invitation = h
            .engine
            .create_invitation(&ctx, invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        let code = invitation.invitation_code.to_lowercase();
        let outcome = h
            .engine
            .respond_to_invitation(&RequestContext::new(bob), &code, InvitationResponse::Reject)
            .await
            .unwrap();
        assert_eq!(outcome.invitation.status, InvitationStatus::Rejected);
        assert!(outcome.grant.is_none());

        let err = h
            .engine
            .invitations
            .cancel_invitation(&ctx, invitation.id, None)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::InvitationAlreadyResponded));

        // A fresh invitation to the same address is allowed again.
        let again = h
            .engine
            .create_invitation(&ctx, invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        let cancelled = h
            .engine
            .invitations
            .cancel_invitation(&ctx, again.id, Some("typo".into()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, InvitationStatus::Cancelled);
        assert_eq!(h.engine.invitations.list_for_email("bob@x.com").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reminder_interval_is_enforced() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        let invitation = h
            .engine
            .create_invitation(&ctx, invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();

        let first = h.engine.send_reminder(&ctx, invitation.id).await.unwrap();
        assert_eq!(first.reminders_sent, 1);
        let err = h.engine.send_reminder(&ctx, invitation.id).await.unwrap_err();
        assert!(err.is(ErrorCode::ReminderThrottled));
        assert_eq!(err.kind, ErrorKind::Throttled);

        h.clock.advance(Duration::hours(25));
        assert_eq!(h.engine.invitations.remindable_invitations().await.unwrap().len(), 1);
        assert_eq!(h.engine.invitations.send_due_reminders().await.unwrap(), 1);
        assert_eq!(h.engine.invitations.send_due_reminders().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delivery_tracking_and_funnel() {
        let h = Harness::new().await;
        let bob = h.directory.register("bob@x.com").await;
        let invitation = h
            .engine
            .create_invitation(&h.owner_ctx(), invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        let code = invitation.invitation_code.clone();

        let delivered = h.engine.invitations.mark_delivered(invitation.id).await.unwrap();
        assert_eq!(delivered.status, InvitationStatus::Delivered);
        let opened = h.engine.invitations.mark_opened(&code).await.unwrap();
        assert_eq!(opened.status, InvitationStatus::Opened);
        // A late delivery receipt does not move it back.
        let still = h.engine.invitations.mark_delivered(invitation.id).await.unwrap();
        assert_eq!(still.status, InvitationStatus::Opened);
        h.engine.invitations.record_link_click(&code).await.unwrap();
        h.engine.invitations.record_view(&code).await.unwrap();
        h.engine
            .respond_to_invitation(&RequestContext::new(bob), &code, InvitationResponse::Accept)
            .await
            .unwrap();

        let since = h.clock.now() - Duration::days(1);
        let funnel = h.engine.deps().analytics.funnel(h.farm_id, since).await.unwrap();
        for event in [
            AnalyticsEventType::Created,
            AnalyticsEventType::Sent,
            AnalyticsEventType::Delivered,
            AnalyticsEventType::Opened,
            AnalyticsEventType::Clicked,
            AnalyticsEventType::Viewed,
        ] {
            assert!(funnel.count(event) >= 1, "missing {event}");
        }
        let timeline = h.engine.deps().analytics.timeline(invitation.id).await.unwrap();
        assert_eq!(timeline.last().map(|e| e.event_type), Some(AnalyticsEventType::Accepted));
    }

    #[tokio::test]
    async fn test_analytics_outage_does_not_block() {
        let h = Harness::new().await;
        h.store.set_analytics_outage(true);
        let invitation = h
            .engine
            .create_invitation(&h.owner_ctx(), invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        assert_eq!(invitation.status, InvitationStatus::Sent);
    }

    #[tokio::test]
    async fn test_archival_after_window() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        let invitation = h
            .engine
            .create_invitation(&ctx, invite(&h, "bob@x.com", FarmRole::Worker))
            .await
            .unwrap();
        h.engine
            .invitations
            .cancel_invitation(&ctx, invitation.id, None)
            .await
            .unwrap();
        assert_eq!(h.engine.invitations.archive_invitations().await.unwrap(), 0);

        let window = h.engine.deps().config.invitation.archive_after_days;
        h.clock.advance(Duration::days(window + 1));
        assert_eq!(h.engine.invitations.archive_invitations().await.unwrap(), 1);
        assert_eq!(h.engine.invitations.archive_invitations().await.unwrap(), 0);
        let archived = h.engine.invitations.get_invitation(invitation.id).await.unwrap();
        assert!(archived.archived_at.is_some());
    }
}
