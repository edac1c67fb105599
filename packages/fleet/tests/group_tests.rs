//! Integration tests for groups, membership and permissions.

mod common;

use crate::common::TestHarness;
use fleet::domains::permissions::{SubjectKind, SERVERS_MANAGE};
use reactor::{Context, Filter};
use test_context::test_context;

// =============================================================================
// Groups
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn creating_a_group_twice_returns_false(ctx: &TestHarness) {
    let system = Context::system();
    assert!(ctx.fleet.create_group(&system, "g1", None).await.unwrap());

    let group = ctx.fleet.group_by_name("g1").await.unwrap().expect("g1 exists");
    assert_eq!(group.with(|g| g.owner_id).unwrap(), None);

    assert!(!ctx.fleet.create_group(&system, "g1", None).await.unwrap());
    assert_eq!(ctx.fleet.engine().store().history("create_group").await.unwrap().len(), 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn removing_a_group_revokes_every_member_first(ctx: &TestHarness) {
    let system = Context::system();
    let u1 = ctx.user("u1").await;
    let u2 = ctx.user("u2").await;
    ctx.fleet.create_group(&system, "g1", None).await.unwrap();
    let g1 = ctx.group_id("g1").await;

    assert!(ctx.fleet.add_member(&system, g1, u1).await.unwrap());
    assert!(ctx.fleet.add_member(&system, g1, u2).await.unwrap());
    assert!(!ctx.fleet.add_member(&system, g1, u1).await.unwrap());
    assert_eq!(ctx.fleet.members(g1).await.unwrap(), vec![u1, u2]);

    assert!(ctx.fleet.remove_group(&system, g1).await.unwrap());

    let rows = ctx
        .fleet
        .deps()
        .members
        .load_all(&Filter::eq("group_id", g1))
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert!(ctx.fleet.group_by_name("g1").await.unwrap().is_none());

    // two leaves, queued in the remove_group batch before it
    let removal = ctx.fleet.engine().store().history("remove_group").await.unwrap();
    let batch = ctx
        .fleet
        .engine()
        .store()
        .batch(removal[0].correlation_id)
        .await
        .unwrap();
    let kinds: Vec<_> = batch.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["group_membership", "group_membership", "remove_group"]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn removing_a_missing_group_or_member_returns_false(ctx: &TestHarness) {
    let system = Context::system();
    let u1 = ctx.user("u1").await;
    ctx.fleet.create_group(&system, "g1", None).await.unwrap();
    let g1 = ctx.group_id("g1").await;

    assert!(!ctx.fleet.remove_member(&system, g1, u1).await.unwrap());
    assert!(!ctx.fleet.remove_group(&system, g1 + 100).await.unwrap());
    // joining a group that does not exist is a no-op too
    assert!(!ctx.fleet.add_member(&system, g1 + 100, u1).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn removing_a_user_revokes_memberships_and_permissions(ctx: &TestHarness) {
    let system = Context::system();
    let u1 = ctx.user("u1").await;
    ctx.fleet.create_group(&system, "g1", Some(u1)).await.unwrap();
    let g1 = ctx.group_id("g1").await;
    ctx.fleet.add_member(&system, g1, u1).await.unwrap();
    ctx.fleet.grant(&system, SubjectKind::User, u1, SERVERS_MANAGE).await.unwrap();

    ctx.fleet.remove_user(&system, u1).await.unwrap();

    assert!(ctx.fleet.user_by_name("u1").await.unwrap().is_none());
    assert!(ctx.fleet.members(g1).await.unwrap().is_empty());
    assert!(ctx.fleet.deps().permissions.load_all(&Filter::all()).await.unwrap().is_empty());
    let group = ctx.fleet.group_by_name("g1").await.unwrap().unwrap();
    assert_eq!(group.with(|g| g.owner_id).unwrap(), None);
}

// =============================================================================
// Permissions
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn granting_twice_returns_false(ctx: &TestHarness) {
    let system = Context::system();
    let u1 = ctx.user("u1").await;

    assert!(ctx.fleet.grant(&system, SubjectKind::User, u1, SERVERS_MANAGE).await.unwrap());
    assert!(!ctx.fleet.grant(&system, SubjectKind::User, u1, SERVERS_MANAGE).await.unwrap());

    assert!(ctx.fleet.revoke(&system, SubjectKind::User, u1, SERVERS_MANAGE).await.unwrap());
    assert!(!ctx.fleet.revoke(&system, SubjectKind::User, u1, SERVERS_MANAGE).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn granting_to_an_unknown_subject_returns_false(ctx: &TestHarness) {
    let granted = ctx
        .fleet
        .grant(&Context::system(), SubjectKind::Group, 42, SERVERS_MANAGE)
        .await
        .unwrap();
    assert!(!granted);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn permissions_are_inherited_from_groups(ctx: &TestHarness) {
    let system = Context::system();
    let u1 = ctx.user("u1").await;
    let as_u1 = common::as_user(u1);
    ctx.fleet.create_group(&system, "ops", None).await.unwrap();
    let ops = ctx.group_id("ops").await;
    ctx.fleet.grant(&system, SubjectKind::Group, ops, SERVERS_MANAGE).await.unwrap();

    assert!(!ctx.fleet.has_permission(&as_u1, SERVERS_MANAGE).await.unwrap());
    ctx.fleet.add_member(&system, ops, u1).await.unwrap();
    assert!(ctx.fleet.has_permission(&as_u1, SERVERS_MANAGE).await.unwrap());
    ctx.fleet.remove_member(&system, ops, u1).await.unwrap();
    assert!(!ctx.fleet.has_permission(&as_u1, SERVERS_MANAGE).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn administrators_hold_every_permission(ctx: &TestHarness) {
    let admin = ctx.admin("root").await;
    assert!(ctx
        .fleet
        .has_permission(&common::as_user(admin), SERVERS_MANAGE)
        .await
        .unwrap());
    assert!(!ctx
        .fleet
        .has_permission(&Context::anonymous(), SERVERS_MANAGE)
        .await
        .unwrap());
}
