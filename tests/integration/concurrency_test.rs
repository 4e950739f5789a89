//! Races between writers on the same records.

use chrono::Duration;

use farmgate_core::traits::Clock;
use farmgate_core::{ErrorCode, ErrorKind};
use farmgate_entity::grant::GrantStatus;
use farmgate_entity::invitation::{InvitationResponse, InvitationStatus};
use farmgate_entity::role::FarmRole;
use farmgate_service::RequestContext;

use crate::helpers::TestEngine;

#[tokio::test]
async fn test_double_accept_creates_one_grant() {
    let t = TestEngine::new().await;
    let bob = t.register("bob@x.com").await;
    let invitation = t.invite("bob@x.com", FarmRole::Worker).await;
    let ctx = RequestContext::new(bob);

    let (first, second) = tokio::join!(
        t.engine
            .respond_to_invitation(&ctx, &invitation.invitation_code, InvitationResponse::Accept),
        t.engine
            .respond_to_invitation(&ctx, &invitation.invitation_code, InvitationResponse::Accept),
    );

    let (winner, loser) = match (first, second) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        (a, b) => panic!("expected exactly one success, got {a:?} and {b:?}"),
    };
    assert_eq!(winner.invitation.status, InvitationStatus::Accepted);
    assert!(loser.is(ErrorCode::InvitationAlreadyResponded));
    assert_eq!(t.store.grant_count().await, 2);

    let grants = t.engine.access.list_farm_members(t.farm_id).await.unwrap();
    assert_eq!(grants.iter().filter(|g| g.user_id == bob).count(), 1);
}

#[tokio::test]
async fn test_owners_revoking_each_other_leaves_one_owner() {
    let t = TestEngine::new().await;
    let bea = t.register("bea@farm.test").await;
    t.engine
        .access
        .provision_grant(&t.owner_ctx(), t.farm_id, bea, FarmRole::Owner, None)
        .await
        .unwrap();
    t.engine
        .access
        .confirm_pending_grant(&RequestContext::new(bea), t.farm_id)
        .await
        .unwrap();
    assert_eq!(t.active_owner_count().await, 2);

    let alice_ctx = t.owner_ctx();
    let bea_ctx = RequestContext::new(bea);
    let (a, b) = tokio::join!(
        t.engine.revoke_access(&alice_ctx, t.farm_id, bea, None),
        t.engine.revoke_access(&bea_ctx, t.farm_id, t.owner, None),
    );

    let loser = match (a, b) {
        (Ok(g), Err(e)) | (Err(e), Ok(g)) => {
            assert_eq!(g.status, GrantStatus::Revoked);
            e
        }
        (a, b) => panic!("expected exactly one revocation, got {a:?} and {b:?}"),
    };
    assert!(
        loser.is(ErrorCode::LastOwnerConstraintViolated)
            || loser.kind == ErrorKind::PermissionDenied
            || loser.kind == ErrorKind::Conflict,
        "unexpected error: {loser:?}"
    );
    assert_eq!(t.active_owner_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_sweeps_expire_once() {
    let t = TestEngine::new().await;
    let invitation = t.invite("late@x.com", FarmRole::Viewer).await;
    t.clock.advance(Duration::days(8));
    assert!(invitation.is_past_expiry(t.clock.now()));

    let (a, b) = tokio::join!(t.engine.run_expiration_sweep(), t.engine.run_expiration_sweep());
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.invitations_expired + b.invitations_expired, 1);

    let stored = t.engine.invitations.get_invitation(invitation.id).await.unwrap();
    assert_eq!(stored.status, InvitationStatus::Expired);
    assert_eq!(t.engine.run_expiration_sweep().await.unwrap().total(), 0);
}
