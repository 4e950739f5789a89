//! Access management scenarios.

use farmgate_core::{ErrorCode, ErrorKind};
use farmgate_entity::audit::{AuditAction, AuditQuery};
use farmgate_entity::grant::GrantStatus;
use farmgate_entity::permission::Permission;
use farmgate_entity::role::FarmRole;
use farmgate_service::RequestContext;

use crate::helpers::TestEngine;

#[tokio::test]
async fn test_only_authorized_members_can_revoke() {
    let t = TestEngine::new().await;
    let worker = t.add_member("worker@x.com", FarmRole::Worker).await;
    let viewer = t.add_member("viewer@x.com", FarmRole::Viewer).await;

    let err = t
        .engine
        .revoke_access(&RequestContext::new(worker), t.farm_id, viewer, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
    assert!(t.engine.check_permission(t.farm_id, viewer, Permission::ViewFarm).await.unwrap());

    let revoked = t
        .engine
        .revoke_access(&t.owner_ctx(), t.farm_id, viewer, Some("left the farm".into()))
        .await
        .unwrap();
    assert_eq!(revoked.status, GrantStatus::Revoked);
    assert!(!revoked.is_active);
    assert!(!t.engine.check_permission(t.farm_id, viewer, Permission::ViewFarm).await.unwrap());

    let log = t
        .engine
        .get_audit_log(
            t.farm_id,
            AuditQuery {
                actions: Some(vec![AuditAction::AccessRevoked]),
                ..AuditQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(log.total_items, 1);
    assert_eq!(log.items[0].action_performed_by, t.owner);
    assert_eq!(log.items[0].target_user_id, Some(viewer));
    assert_eq!(log.items[0].previous_role, Some(FarmRole::Viewer));
    assert_eq!(log.items[0].reason.as_deref(), Some("left the farm"));
}

#[tokio::test]
async fn test_last_owner_cannot_be_removed() {
    let t = TestEngine::new().await;
    let ctx = t.owner_ctx();

    let err = t.engine.revoke_access(&ctx, t.farm_id, t.owner, None).await.unwrap_err();
    assert!(err.is(ErrorCode::LastOwnerConstraintViolated));
    let err = t.engine.suspend_access(&ctx, t.farm_id, t.owner, None).await.unwrap_err();
    assert!(err.is(ErrorCode::LastOwnerConstraintViolated));
    let err = t
        .engine
        .access
        .change_role(&ctx, t.farm_id, t.owner, FarmRole::Manager, None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::LastOwnerConstraintViolated));

    assert_eq!(t.active_owner_count().await, 1);
}

#[tokio::test]
async fn test_a_second_owner_allows_stepping_down() {
    let t = TestEngine::new().await;
    let ctx = t.owner_ctx();
    let bea = t.register("bea@x.com").await;
    let pending = t
        .engine
        .access
        .provision_grant(&ctx, t.farm_id, bea, FarmRole::Owner, Some("co-owner".into()))
        .await
        .unwrap();
    assert_eq!(pending.status, GrantStatus::Pending);
    // Pending owners do not count towards the floor.
    let err = t.engine.revoke_access(&ctx, t.farm_id, t.owner, None).await.unwrap_err();
    assert!(err.is(ErrorCode::LastOwnerConstraintViolated));

    t.engine
        .access
        .confirm_pending_grant(&RequestContext::new(bea), t.farm_id)
        .await
        .unwrap();
    assert_eq!(t.active_owner_count().await, 2);

    t.engine
        .revoke_access(&RequestContext::new(bea), t.farm_id, t.owner, None)
        .await
        .unwrap();
    assert_eq!(t.active_owner_count().await, 1);
    let err = t
        .engine
        .revoke_access(&RequestContext::new(bea), t.farm_id, bea, None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::LastOwnerConstraintViolated));
}

#[tokio::test]
async fn test_suspension_blocks_checks_until_restored() {
    let t = TestEngine::new().await;
    let ctx = t.owner_ctx();
    let sam = t.add_member("sam@x.com", FarmRole::Supervisor).await;

    t.engine.suspend_access(&ctx, t.farm_id, sam, None).await.unwrap();
    assert!(!t.engine.check_permission(t.farm_id, sam, Permission::ViewFarm).await.unwrap());
    let err = t
        .engine
        .create_invitation(
            &RequestContext::new(sam),
            farmgate_service::CreateInvitationRequest::new(t.farm_id, "new@x.com", FarmRole::Worker),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);

    let restored = t.engine.restore_access(&ctx, t.farm_id, sam, None).await.unwrap();
    assert_eq!(restored.status, GrantStatus::Accepted);
    assert!(t.engine.check_permission(t.farm_id, sam, Permission::ViewFarm).await.unwrap());

    let err = t.engine.restore_access(&ctx, t.farm_id, sam, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidStateTransition);
}

#[tokio::test]
async fn test_membership_listings() {
    let t = TestEngine::new().await;
    let wes = t.add_member("wes@x.com", FarmRole::Worker).await;

    let members = t.engine.access.list_farm_members(t.farm_id).await.unwrap();
    assert_eq!(members.len(), 2);
    let farms = t.engine.access.list_user_farms(wes).await.unwrap();
    assert_eq!(farms.len(), 1);
    assert_eq!(farms[0].farm_id, t.farm_id);
    assert_eq!(farms[0].role, FarmRole::Worker);

    let outsider = t.register("out@x.com").await;
    assert!(!t.engine.check_permission(t.farm_id, outsider, Permission::ViewFarm).await.unwrap());
}
