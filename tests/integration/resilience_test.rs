//! Behaviour under storage faults.

use farmgate_core::{ErrorCode, ErrorKind};
use farmgate_entity::grant::GrantStatus;
use farmgate_entity::invitation::{InvitationResponse, InvitationStatus};
use farmgate_entity::permission::Permission;
use farmgate_entity::role::FarmRole;
use farmgate_service::{CreateInvitationRequest, RequestContext};

use crate::helpers::TestEngine;

#[tokio::test]
async fn test_audit_outage_blocks_revocation() {
    let t = TestEngine::new().await;
    let worker = t.add_member("wes@x.com", FarmRole::Worker).await;
    let audit_before = t.store.audit_len().await;

    t.store.set_audit_outage(true);
    let err = t
        .engine
        .revoke_access(&t.owner_ctx(), t.farm_id, worker, Some("seasonal".into()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageUnavailable);
    assert!(err.is_retryable());
    assert_eq!(t.store.audit_len().await, audit_before);

    let grant = t
        .engine
        .access
        .get_farm_access(t.farm_id, worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.status, GrantStatus::Accepted);
    assert!(
        t.engine
            .check_permission(t.farm_id, worker, Permission::ViewFarm)
            .await
            .unwrap()
    );

    t.store.set_audit_outage(false);
    t.engine
        .revoke_access(&t.owner_ctx(), t.farm_id, worker, None)
        .await
        .unwrap();
    assert_eq!(t.store.audit_len().await, audit_before + 1);
}

#[tokio::test]
async fn test_analytics_outage_does_not_block_accept() {
    let t = TestEngine::new().await;
    let bob = t.register("bob@x.com").await;
    t.store.set_analytics_outage(true);
    let invitation = t.invite("bob@x.com", FarmRole::Viewer).await;

    let outcome = t
        .engine
        .respond_to_invitation(
            &RequestContext::new(bob),
            &invitation.invitation_code,
            InvitationResponse::Accept,
        )
        .await
        .unwrap();
    assert_eq!(outcome.invitation.status, InvitationStatus::Accepted);
    assert!(
        t.engine
            .deps()
            .analytics
            .timeline(invitation.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_lost_acknowledgement_still_reports_acceptance() {
    let t = TestEngine::new().await;
    let bob = t.register("bob@x.com").await;
    let invitation = t.invite("bob@x.com", FarmRole::Supervisor).await;
    let ctx = RequestContext::new(bob);

    t.store.drop_next_accept_ack();
    let outcome = t
        .engine
        .respond_to_invitation(&ctx, &invitation.invitation_code, InvitationResponse::Accept)
        .await
        .unwrap();
    let grant = outcome.grant.unwrap();
    assert_eq!(grant.role, FarmRole::Supervisor);
    assert!(grant.is_active);

    let err = t
        .engine
        .respond_to_invitation(&ctx, &invitation.invitation_code, InvitationResponse::Accept)
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvitationAlreadyResponded));
    assert_eq!(t.store.grant_count().await, 2);
}

#[tokio::test]
async fn test_transient_read_failures_are_retried() {
    let t = TestEngine::new().await;
    t.store.fail_next_reads(2);
    assert!(
        t.engine
            .check_permission(t.farm_id, t.owner, Permission::DeleteFarm)
            .await
            .unwrap()
    );

    t.store.fail_next_reads(10);
    let err = t
        .engine
        .check_permission(t.farm_id, t.owner, Permission::DeleteFarm)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageUnavailable);

    t.store.fail_next_reads(0);
    assert!(
        t.engine
            .check_permission(t.farm_id, t.owner, Permission::ViewFarm)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_storage_outage_fails_creation() {
    let t = TestEngine::new().await;
    t.store.set_storage_outage(true);
    let err = t
        .engine
        .create_invitation(
            &t.owner_ctx(),
            CreateInvitationRequest::new(t.farm_id, "new@x.com", FarmRole::Viewer),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageUnavailable);

    t.store.set_storage_outage(false);
    assert!(
        t.engine
            .invitations
            .list_for_farm(t.farm_id, None)
            .await
            .unwrap()
            .is_empty()
    );
}
