//! Invitation lifecycle scenarios.

use chrono::Duration;

use farmgate_core::ErrorCode;
use farmgate_core::events::{InvitationNotification, NotificationPayload};
use farmgate_core::traits::Clock;
use farmgate_entity::audit::{AuditAction, AuditQuery};
use farmgate_entity::grant::GrantStatus;
use farmgate_entity::invitation::{InvitationResponse, InvitationStatus};
use farmgate_entity::role::FarmRole;
use farmgate_service::RequestContext;

use crate::helpers::TestEngine;

#[tokio::test]
async fn test_accepting_manager_invitation_creates_grant() {
    let t = TestEngine::new().await;
    let bob = t.register("bob@x.com").await;
    let invitation = t.invite("bob@x.com", FarmRole::Manager).await;
    assert_eq!(invitation.status, InvitationStatus::Sent);

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
    let grant = outcome.grant.unwrap();
    assert_eq!(grant.user_id, bob);
    assert_eq!(grant.role, FarmRole::Manager);
    assert_eq!(grant.status, GrantStatus::Accepted);
    assert!(grant.is_active);
    assert_eq!(grant.invitation_id, Some(invitation.id));

    let log = t
        .engine
        .get_audit_log(
            t.farm_id,
            AuditQuery {
                actions: Some(vec![AuditAction::Accepted]),
                ..AuditQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(log.total_items, 1);
    let entry = &log.items[0];
    assert_eq!(entry.target_user_id, Some(bob));
    assert_eq!(entry.new_role, Some(FarmRole::Manager));
    assert_eq!(entry.invitation_id, Some(invitation.id));
}

#[tokio::test]
async fn test_invitation_round_trips_by_code() {
    let t = TestEngine::new().await;
    let created = t.invite("Carol@X.com ", FarmRole::Worker).await;

    let fetched = t
        .engine
        .invitations
        .get_invitation_by_code(&created.invitation_code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.invitee_email, "carol@x.com");
    assert_eq!(fetched.status, InvitationStatus::Sent);
    assert_eq!(fetched.reminders_sent, 0);
    let sent_at = fetched.sent_at.unwrap();
    assert_eq!(sent_at, t.clock.now());
    assert_eq!(fetched.expires_at, sent_at + Duration::days(7));
    assert!(fetched.invitation_link.ends_with(&fetched.invitation_code));
}

#[tokio::test]
async fn test_expired_invitation_cannot_be_accepted() {
    let t = TestEngine::new().await;
    let bob = t.register("bob@x.com").await;
    let invitation = t.invite("bob@x.com", FarmRole::Worker).await;

    t.clock.advance(Duration::days(7) + Duration::seconds(1));
    let report = t.engine.run_expiration_sweep().await.unwrap();
    assert_eq!(report.invitations_expired, 1);

    let err = t
        .engine
        .respond_to_invitation(
            &RequestContext::new(bob),
            &invitation.invitation_code,
            InvitationResponse::Accept,
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvitationExpired));
    assert!(
        !t.engine
            .check_permission(t.farm_id, bob, farmgate_entity::permission::Permission::ViewFarm)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_expiry_applies_before_the_sweep_runs() {
    let t = TestEngine::new().await;
    let bob = t.register("bob@x.com").await;
    let invitation = t.invite("bob@x.com", FarmRole::Worker).await;

    t.clock.advance(Duration::days(8));
    let err = t
        .engine
        .respond_to_invitation(
            &RequestContext::new(bob),
            &invitation.invitation_code,
            InvitationResponse::Accept,
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvitationExpired));

    let stored = t.engine.invitations.get_invitation(invitation.id).await.unwrap();
    assert_eq!(stored.status, InvitationStatus::Expired);
    assert_eq!(t.engine.run_expiration_sweep().await.unwrap().invitations_expired, 0);
}

#[tokio::test]
async fn test_reminders_are_capped() {
    let t = TestEngine::new().await;
    let invitation = t.invite("dan@x.com", FarmRole::Viewer).await;
    let ctx = t.owner_ctx();

    for n in 1..=3 {
        let reminded = t.engine.send_reminder(&ctx, invitation.id).await.unwrap();
        assert_eq!(reminded.reminders_sent, n);
        let err = t.engine.send_reminder(&ctx, invitation.id).await.unwrap_err();
        assert!(err.is(ErrorCode::ReminderThrottled));
        t.clock.advance(Duration::hours(25));
    }

    let err = t.engine.send_reminder(&ctx, invitation.id).await.unwrap_err();
    assert!(err.is(ErrorCode::ReminderThrottled));
    let stored = t.engine.invitations.get_invitation(invitation.id).await.unwrap();
    assert_eq!(stored.reminders_sent, 3);
    assert!(stored.reminders_sent <= stored.max_reminders);
}

#[tokio::test]
async fn test_invitee_is_notified_once_sent() {
    let mut t = TestEngine::new().await;
    t.drain_notifications();
    let invitation = t.invite("erin@x.com", FarmRole::Worker).await;

    let sent: Vec<_> = t
        .drain_notifications()
        .into_iter()
        .filter_map(|n| match n.payload {
            NotificationPayload::Invitation(InvitationNotification::Sent {
                invitation_id, ..
            }) => Some(invitation_id),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![invitation.id]);
}

#[tokio::test]
async fn test_declined_invitation_leaves_no_access() {
    let t = TestEngine::new().await;
    let frank = t.register("frank@x.com").await;
    let invitation = t.invite("frank@x.com", FarmRole::Supervisor).await;

    let outcome = t
        .engine
        .respond_to_invitation(
            &RequestContext::new(frank),
            &invitation.invitation_code,
            InvitationResponse::Reject,
        )
        .await
        .unwrap();
    assert_eq!(outcome.invitation.status, InvitationStatus::Rejected);
    assert!(outcome.grant.is_none());
    assert!(
        t.engine
            .access
            .get_farm_access(t.farm_id, frank)
            .await
            .unwrap()
            .is_none()
    );

    let err = t
        .engine
        .respond_to_invitation(
            &RequestContext::new(frank),
            &invitation.invitation_code,
            InvitationResponse::Accept,
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvitationAlreadyResponded));
}
