//! Authorization tests
//!
//! Every top-level raise by a non-system identity must be allowed by some
//! veto: administrators, self service, ownership or a management permission.
//! Anonymous identities are always denied.

mod common;

use crate::common::{as_user, TestHarness};
use fleet::domains::permissions::{SubjectKind, SERVERS_MANAGE};
use fleet::domains::servers::PowerState;
use reactor::{Context, ReactorError};
use test_context::test_context;

// =============================================================================
// Groups
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn anonymous_cannot_create_groups(ctx: &TestHarness) {
    let err = ctx
        .fleet
        .create_group(&Context::anonymous(), "g1", None)
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));

    // nothing persisted for a vetoed raise
    let history = ctx.fleet.engine().store().history("create_group").await.unwrap();
    assert!(history.is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn only_administrators_create_groups(ctx: &TestHarness) {
    let user = ctx.user("u1").await;
    let admin = ctx.admin("root").await;

    let err = ctx
        .fleet
        .create_group(&as_user(user), "g1", None)
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));

    assert!(ctx.fleet.create_group(&as_user(admin), "g1", None).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn group_owners_manage_their_members(ctx: &TestHarness) {
    let system = Context::system();
    let owner = ctx.user("owner").await;
    let member = ctx.user("member").await;
    let outsider = ctx.user("outsider").await;
    ctx.fleet.create_group(&system, "g1", Some(owner)).await.unwrap();
    let g1 = ctx.group_id("g1").await;

    assert!(ctx.fleet.add_member(&as_user(owner), g1, member).await.unwrap());

    let err = ctx
        .fleet
        .remove_member(&as_user(outsider), g1, member)
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));
    assert_eq!(ctx.fleet.members(g1).await.unwrap(), vec![member]);
}

// =============================================================================
// Users
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn users_change_only_their_own_password(ctx: &TestHarness) {
    let alice = ctx.user("alice").await;
    let bob = ctx.user("bob").await;

    ctx.fleet
        .change_password(&as_user(alice), alice, "hash-a")
        .await
        .unwrap();
    let stored = ctx.fleet.user_by_name("alice").await.unwrap().unwrap();
    assert_eq!(
        stored.with(|u| u.password_hash.clone()).unwrap().as_deref(),
        Some("hash-a")
    );

    let err = ctx
        .fleet
        .change_password(&as_user(bob), alice, "hash-b")
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));
}

// =============================================================================
// Servers
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn owners_operate_their_servers(ctx: &TestHarness) {
    let owner = ctx.user("owner").await;
    let other = ctx.user("other").await;
    let server = ctx.server("survival", "v1", Some(owner)).await;

    let err = ctx
        .fleet
        .start_server(&as_user(other), server.key())
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));

    assert!(ctx.fleet.start_server(&as_user(owner), server.key()).await.unwrap());
    assert_eq!(server.with(|s| s.state).unwrap(), PowerState::Running);

    // ownership covers power and upgrades, not removal
    let err = ctx
        .fleet
        .remove_server(&as_user(owner), server.key())
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn server_managers_create_and_remove_servers(ctx: &TestHarness) {
    let system = Context::system();
    let manager = ctx.user("manager").await;
    let as_manager = as_user(manager);

    let err = ctx
        .fleet
        .create_server(&as_manager, "survival", "v1", None, None)
        .await
        .unwrap_err();
    assert!(ReactorError::is_access_denied(&err));

    ctx.fleet
        .grant(&system, SubjectKind::User, manager, SERVERS_MANAGE)
        .await
        .unwrap();
    let server = ctx
        .fleet
        .create_server(&as_manager, "survival", "v1", None, None)
        .await
        .unwrap();
    assert!(ctx.fleet.start_server(&as_manager, server.key()).await.unwrap());
    ctx.fleet.remove_server(&as_manager, server.key()).await.unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
async fn nested_events_run_with_the_reaction_authority(ctx: &TestHarness) {
    // the owner may upgrade; the nested power and image events it raises are
    // not vetoed again, although the owner could not raise an image change
    let owner = ctx.user("owner").await;
    let server = ctx.running_server("survival", "v1", Some(owner)).await;

    ctx.fleet
        .upgrade_server(&as_user(owner), server.key(), "v2")
        .await
        .unwrap();
    assert_eq!(server.with(|s| s.image.clone()).unwrap(), "v2");
}
