//! Bulk batches end to end.

use chrono::Duration;
use futures::future::join_all;

use farmgate_entity::bulk::{BulkInvitation, BulkInvitationStatus};
use farmgate_entity::invitation::InvitationResponse;
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::role::FarmRole;
use farmgate_service::{BulkInvitationRequest, RequestContext};

use crate::helpers::TestEngine;

fn request(t: &TestEngine, emails: &[&str]) -> BulkInvitationRequest {
    BulkInvitationRequest {
        farm_id: t.farm_id,
        emails: emails.iter().map(|e| e.to_string()).collect(),
        default_role: FarmRole::Worker,
        custom_permissions: PermissionSet::new(),
        message: None,
    }
}

async fn code_for(t: &TestEngine, email: &str) -> String {
    t.engine
        .invitations
        .list_for_email(email)
        .await
        .unwrap()
        .remove(0)
        .invitation_code
}

fn resolved_and_outstanding(bulk: &BulkInvitation) -> i32 {
    bulk.sent_count + bulk.accepted_count + bulk.rejected_count + bulk.expired_count
}

#[tokio::test]
async fn test_counters_never_exceed_total() {
    let t = TestEngine::new().await;
    let pia = t.register("pia@x.com").await;
    let report = t
        .engine
        .create_bulk_invitation(
            &t.owner_ctx(),
            request(&t, &["pia@x.com", "quinn@x.com", "not-an-email", "rob@x.com"]),
        )
        .await
        .unwrap();
    let bulk = &report.bulk;
    assert_eq!(bulk.total_invitations, 4);
    assert_eq!((bulk.sent_count, bulk.failed_count), (3, 1));

    t.engine
        .respond_to_invitation(
            &RequestContext::new(pia),
            &code_for(&t, "pia@x.com").await,
            InvitationResponse::Accept,
        )
        .await
        .unwrap();
    t.clock.advance(Duration::days(8));
    t.engine.run_expiration_sweep().await.unwrap();

    let bulk = t.engine.bulk.get_bulk_invitation(report.bulk.id).await.unwrap();
    assert_eq!(
        (bulk.sent_count, bulk.accepted_count, bulk.expired_count),
        (0, 1, 2)
    );
    assert!(resolved_and_outstanding(&bulk) + bulk.failed_count <= bulk.total_invitations);
    assert_eq!(bulk.status, BulkInvitationStatus::Completed);
}

#[tokio::test]
async fn test_concurrent_accepts_keep_counts_exact() {
    let t = TestEngine::new().await;
    let emails = ["u1@x.com", "u2@x.com", "u3@x.com", "u4@x.com"];
    let mut users = Vec::new();
    for email in emails {
        users.push(t.register(email).await);
    }
    let report = t
        .engine
        .create_bulk_invitation(&t.owner_ctx(), request(&t, &emails))
        .await
        .unwrap();
    assert_eq!(report.bulk.sent_count, 4);

    let mut codes = Vec::new();
    for email in emails {
        codes.push(code_for(&t, email).await);
    }
    let contexts: Vec<_> = users.iter().map(|u| RequestContext::new(*u)).collect();
    let results = join_all(contexts.iter().zip(&codes).map(|(ctx, code)| {
        t.engine
            .respond_to_invitation(ctx, code, InvitationResponse::Accept)
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let bulk = t.engine.bulk.get_bulk_invitation(report.bulk.id).await.unwrap();
    assert_eq!(bulk.accepted_count, 4);
    assert_eq!(bulk.sent_count, 0);
    assert!(bulk.is_complete());
    assert!((bulk.acceptance_rate() - 100.0).abs() < f64::EPSILON);
    assert_eq!(t.engine.access.list_farm_members(t.farm_id).await.unwrap().len(), 5);
}
