//! Bulk invitation fan-out.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use farmgate_core::types::{BulkInvitationId, FarmId};
use farmgate_core::{AppError, AppResult, ErrorCode, ErrorKind};
use farmgate_entity::bulk::{BulkInvitation, BulkInvitationItem, BulkInvitationStatus, BulkItemOutcome};
use farmgate_entity::invitation::InvitationPriority;
use farmgate_entity::permission::{Permission, PermissionSet};
use farmgate_entity::role::FarmRole;

use super::progress::BulkProgress;
use crate::context::RequestContext;
use crate::deps::EngineDeps;
use crate::invitation::{CreateInvitationRequest, InvitationService};

/// Request to invite a list of addresses with the same role.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkInvitationRequest {
    /// The farm being joined.
    pub farm_id: FarmId,
    /// Invitee addresses. Malformed ones fail individually.
    #[validate(length(min = 1, message = "At least one email is required"))]
    pub emails: Vec<String>,
    /// Role for every invitation.
    pub default_role: FarmRole,
    /// Permission override for every invitation.
    #[serde(default)]
    pub custom_permissions: PermissionSet,
    /// Personal note for every invitation.
    #[validate(length(max = 2000, message = "Message must be at most 2000 characters"))]
    pub message: Option<String>,
}

/// A batch with its per-address results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInvitationReport {
    /// The batch record.
    pub bulk: BulkInvitation,
    /// Items in submission order.
    pub items: Vec<BulkInvitationItem>,
}

/// Creates one invitation per address and keeps the batch counters.
#[derive(Debug, Clone)]
pub struct BulkInvitationCoordinator {
    deps: EngineDeps,
    invitations: InvitationService,
    progress: BulkProgress,
}

impl BulkInvitationCoordinator {
    /// Creates a coordinator that sends through `invitations`.
    pub fn new(deps: EngineDeps, invitations: InvitationService) -> Self {
        let progress = BulkProgress::new(deps.clone());
        Self {
            deps,
            invitations,
            progress,
        }
    }

    /// Record the batch and send every invitation.
    pub async fn create_bulk_invitation(
        &self,
        ctx: &RequestContext,
        req: BulkInvitationRequest,
    ) -> AppResult<BulkInvitationReport> {
        let bulk = self.prepare_bulk_invitation(ctx, req).await?;
        self.process_bulk_invitation(ctx, bulk.id).await
    }

    /// Validate and store the batch with all items pending.
    pub async fn prepare_bulk_invitation(
        &self,
        ctx: &RequestContext,
        req: BulkInvitationRequest,
    ) -> AppResult<BulkInvitation> {
        req.validate()?;
        let actor = self.deps.authority(req.farm_id, ctx.actor_id).await?;
        actor.require(Permission::InviteMembers)?;
        actor.require_outranks(req.default_role)?;
        actor.require_delegable(&req.custom_permissions)?;

        let emails = dedupe_emails(&req.emails);
        let max = self.deps.config.bulk.max_batch_size;
        if emails.len() > max {
            return Err(AppError::validation(format!(
                "A batch may hold at most {max} addresses, got {}",
                emails.len()
            )));
        }
        if emails.is_empty() {
            return Err(AppError::validation("At least one email is required"));
        }

        let now = self.deps.now();
        let total = i32::try_from(emails.len())
            .map_err(|_| AppError::validation("Too many addresses in batch"))?;
        let bulk = BulkInvitation::new(
            req.farm_id,
            ctx.actor_id,
            req.default_role,
            req.custom_permissions,
            req.message,
            total,
            now,
        );
        let items = emails
            .into_iter()
            .zip(0..)
            .map(|(email, position)| BulkInvitationItem {
                bulk_invitation_id: bulk.id,
                position,
                email,
                outcome: BulkItemOutcome::Pending,
                processed_at: None,
            })
            .collect();

        let bulk = self.deps.stores.bulk.insert_bulk(bulk, items).await?;
        info!(
            bulk_id = %bulk.id,
            farm_id = %bulk.farm_id,
            total = bulk.total_invitations,
            role = %bulk.default_role,
            "Bulk invitation created"
        );
        Ok(bulk)
    }

    /// Send the pending items of a batch in order. The batch record is
    /// re-read before each item; once it is cancelled the remaining items
    /// are skipped. Individual failures are recorded on the item.
    pub async fn process_bulk_invitation(
        &self,
        ctx: &RequestContext,
        bulk_id: BulkInvitationId,
    ) -> AppResult<BulkInvitationReport> {
        let items = self.deps.stores.bulk.list_bulk_items(bulk_id).await?;
        let mut cancelled = false;

        for mut item in items {
            if item.outcome != BulkItemOutcome::Pending {
                continue;
            }
            if !cancelled {
                let parent = self.load(bulk_id).await?;
                cancelled = parent.status == BulkInvitationStatus::Cancelled;
                if !cancelled {
                    item.outcome = self.send_item(ctx, &parent, &item).await?;
                }
            }
            if cancelled {
                item.outcome = BulkItemOutcome::Skipped;
            }

            item.processed_at = Some(self.deps.now());
            self.deps.stores.bulk.update_bulk_item(item).await?;
        }

        let report = self.report(bulk_id).await?;
        info!(
            bulk_id = %bulk_id,
            sent = report.bulk.sent_count,
            failed = report.bulk.failed_count,
            status = %report.bulk.status,
            "Bulk invitation processed"
        );
        Ok(report)
    }

    /// Create one item's invitation. Its `sent` slot is taken first, so an
    /// answer that arrives before `create` returns is still counted.
    async fn send_item(
        &self,
        ctx: &RequestContext,
        parent: &BulkInvitation,
        item: &BulkInvitationItem,
    ) -> AppResult<BulkItemOutcome> {
        let bulk_id = parent.id;
        if !self.progress.reserve_send(bulk_id, self.deps.now()).await? {
            return Ok(BulkItemOutcome::Skipped);
        }
        let req = CreateInvitationRequest {
            farm_id: parent.farm_id,
            invitee_email: item.email.clone(),
            proposed_role: parent.default_role,
            custom_permissions: parent.custom_permissions.clone(),
            message: parent.message.clone(),
            priority: InvitationPriority::Normal,
            send_immediately: true,
        };
        match self.invitations.create(ctx, req, Some(bulk_id)).await {
            Ok(invitation) => Ok(BulkItemOutcome::Sent {
                invitation_id: invitation.id,
            }),
            Err(e) if e.kind == ErrorKind::StorageUnavailable => {
                if let Err(release) = self.progress.release_send(bulk_id, false, self.deps.now()).await {
                    warn!(bulk_id = %bulk_id, error = %release, "Failed to release bulk slot");
                }
                Err(e)
            }
            Err(e) => {
                warn!(bulk_id = %bulk_id, position = item.position, error = %e, "Bulk item failed");
                self.progress.release_send(bulk_id, true, self.deps.now()).await?;
                Ok(BulkItemOutcome::Failed { reason: e.message })
            }
        }
    }

    /// Stop a batch. Invitations already sent stay live.
    pub async fn cancel_bulk_invitation(
        &self,
        ctx: &RequestContext,
        bulk_id: BulkInvitationId,
    ) -> AppResult<BulkInvitation> {
        let current = self.load(bulk_id).await?;
        let actor = self.deps.authority(current.farm_id, ctx.actor_id).await?;
        if current.created_by != ctx.actor_id {
            actor.require(Permission::ManageAccess)?;
        }

        let mut current = current;
        loop {
            let now = self.deps.now();
            let expected = current.version;
            let mut next = current.clone();
            if !next.cancel(now) {
                return Err(AppError::invalid_transition(format!(
                    "Bulk invitation {bulk_id} is already {}",
                    current.status
                )));
            }
            match self.deps.stores.bulk.update_bulk(next, expected).await {
                Ok(stored) => {
                    info!(bulk_id = %bulk_id, actor_id = %ctx.actor_id, "Bulk invitation cancelled");
                    return Ok(stored);
                }
                Err(e) if e.kind == ErrorKind::Conflict => {
                    current = self.load(bulk_id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The batch record with its items.
    pub async fn report(&self, bulk_id: BulkInvitationId) -> AppResult<BulkInvitationReport> {
        let bulk = self.load(bulk_id).await?;
        let store = &self.deps.stores.bulk;
        let items = self
            .deps
            .read(|| async move { store.list_bulk_items(bulk_id).await })
            .await?;
        Ok(BulkInvitationReport { bulk, items })
    }

    /// The batch record.
    pub async fn get_bulk_invitation(&self, bulk_id: BulkInvitationId) -> AppResult<BulkInvitation> {
        self.load(bulk_id).await
    }

    /// Batches for a farm, newest first.
    pub async fn list_for_farm(&self, farm_id: FarmId) -> AppResult<Vec<BulkInvitation>> {
        let store = &self.deps.stores.bulk;
        self.deps
            .read(|| async move { store.list_farm_bulks(farm_id).await })
            .await
    }

    async fn load(&self, bulk_id: BulkInvitationId) -> AppResult<BulkInvitation> {
        let store = &self.deps.stores.bulk;
        self.deps
            .read(|| async move { store.find_bulk(bulk_id).await })
            .await?
            .ok_or_else(|| {
                AppError::coded(
                    ErrorCode::BulkInvitationNotFound,
                    format!("Bulk invitation {bulk_id} not found"),
                )
            })
    }
}

/// Trim and lowercase every address and drop repeats, keeping first-seen
/// order. Blank entries are dropped; malformed ones are kept so they fail
/// as items.
fn dedupe_emails(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use farmgate_entity::invitation::{InvitationResponse, InvitationStatus};

    use super::*;
    use crate::testing::Harness;

    fn batch(h: &Harness, emails: &[&str]) -> BulkInvitationRequest {
        BulkInvitationRequest {
            farm_id: h.farm_id,
            emails: emails.iter().map(|e| e.to_string()).collect(),
            default_role: FarmRole::Worker,
            custom_permissions: PermissionSet::new(),
            message: Some("Welcome to the flock".into()),
        }
    }

    #[test]
    fn test_dedupe_keeps_first_seen_order() {
        let raw = vec![
            " Bob@X.com ".to_string(),
            "carol@x.com".to_string(),
            "bob@x.com".to_string(),
            "".to_string(),
            "not-an-email".to_string(),
        ];
        assert_eq!(
            dedupe_emails(&raw),
            vec!["bob@x.com", "carol@x.com", "not-an-email"]
        );
    }

    async fn code_for(h: &Harness, email: &str) -> String {
        h.engine
            .invitations
            .list_for_email(email)
            .await
            .unwrap()
            .remove(0)
            .invitation_code
    }

    #[tokio::test]
    async fn test_failures_are_recorded_per_item() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        h.add_member("member@x.com", FarmRole::Viewer).await;

        let report = h
            .engine
            .create_bulk_invitation(
                &ctx,
                batch(&h, &["a@x.com", "broken", "member@x.com", "A@x.com", "b@x.com"]),
            )
            .await
            .unwrap();
        assert_eq!(report.bulk.total_invitations, 4);
        assert_eq!(report.bulk.sent_count, 2);
        assert_eq!(report.bulk.failed_count, 2);
        assert_eq!(report.bulk.status, BulkInvitationStatus::InProgress);
        let labels: Vec<_> = report.items.iter().map(|i| i.outcome.label()).collect();
        assert_eq!(labels, vec!["sent", "failed", "failed", "sent"]);
        assert!(report.items.iter().all(|i| i.processed_at.is_some()));

        let invitations = h
            .engine
            .invitations
            .list_for_farm(h.farm_id, Some(InvitationStatus::Sent))
            .await
            .unwrap();
        assert!(invitations
            .iter()
            .filter(|i| i.bulk_invitation_id == Some(report.bulk.id))
            .all(|i| i.message.as_deref() == Some("Welcome to the flock")));
    }

    #[tokio::test]
    async fn test_resolutions_move_counters() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        let a = h.directory.register("a@x.com").await;
        let b = h.directory.register("b@x.com").await;
        let report = h
            .engine
            .create_bulk_invitation(&ctx, batch(&h, &["a@x.com", "b@x.com", "c@x.com"]))
            .await
            .unwrap();
        assert_eq!(report.bulk.sent_count, 3);

        h.engine
            .respond_to_invitation(
                &RequestContext::new(a),
                &code_for(&h, "a@x.com").await,
                InvitationResponse::Accept,
            )
            .await
            .unwrap();
        h.engine
            .respond_to_invitation(
                &RequestContext::new(b),
                &code_for(&h, "b@x.com").await,
                InvitationResponse::Reject,
            )
            .await
            .unwrap();
        h.clock.advance(chrono::Duration::days(8));
        h.engine.run_expiration_sweep().await.unwrap();

        let bulk = h.engine.bulk.get_bulk_invitation(report.bulk.id).await.unwrap();
        assert_eq!(
            (bulk.sent_count, bulk.accepted_count, bulk.rejected_count, bulk.expired_count),
            (0, 1, 1, 1)
        );
        assert_eq!(bulk.status, BulkInvitationStatus::Completed);
        assert!(bulk.is_complete());
        assert!((bulk.completion_percentage() - 100.0).abs() < f64::EPSILON);
        assert!(bulk.sent_count + bulk.accepted_count + bulk.rejected_count + bulk.expired_count
            <= bulk.total_invitations);
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_remaining_items() {
        let h = Harness::new().await;
        let ctx = h.owner_ctx();
        let bulk = h
            .engine
            .bulk
            .prepare_bulk_invitation(&ctx, batch(&h, &["a@x.com", "b@x.com"]))
            .await
            .unwrap();
        assert_eq!(bulk.status, BulkInvitationStatus::Pending);

        let cancelled = h.engine.bulk.cancel_bulk_invitation(&ctx, bulk.id).await.unwrap();
        assert_eq!(cancelled.status, BulkInvitationStatus::Cancelled);
        let err = h.engine.bulk.cancel_bulk_invitation(&ctx, bulk.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidStateTransition);

        let report = h.engine.bulk.process_bulk_invitation(&ctx, bulk.id).await.unwrap();
        assert!(report.items.iter().all(|i| i.outcome == BulkItemOutcome::Skipped));
        assert_eq!(report.bulk.sent_count, 0);
        assert!(report.bulk.is_complete());
        assert!(h.engine.invitations.list_for_farm(h.farm_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_is_bounded() {
        let mut config = farmgate_core::config::AppConfig::default();
        config.analytics.inline = true;
        config.bulk.max_batch_size = 2;
        let h = Harness::with_config(config).await;
        let err = h
            .engine
            .create_bulk_invitation(&h.owner_ctx(), batch(&h, &["a@x.com", "b@x.com", "c@x.com"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = h
            .engine
            .create_bulk_invitation(&h.owner_ctx(), batch(&h, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
