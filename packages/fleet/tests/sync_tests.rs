//! Integration tests for the synchronization sweep.

mod common;

use crate::common::{as_user, TestHarness};
use fleet::domains::servers::PowerState;
use fleet::domains::sync::ContainerObserved;
use reactor::{Context, ReactorError};
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn sweep_records_every_managed_container(ctx: &TestHarness) {
    ctx.running_server("survival", "v1", None).await;
    ctx.server("creative", "v1", None).await;

    let changed = ctx.fleet.synchronize(&Context::system()).await.unwrap();
    assert_eq!(changed, 0);

    let observed = ctx
        .fleet
        .engine()
        .store()
        .history("container_observed")
        .await
        .unwrap();
    let mut states: Vec<_> = observed
        .iter()
        .map(|e| e.decode::<ContainerObserved>().unwrap())
        .map(|o| (o.name, o.kind, o.state))
        .collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        states,
        vec![
            ("fleet-creative".to_string(), Some("server".to_string()), PowerState::Stopped),
            ("fleet-survival".to_string(), Some("server".to_string()), PowerState::Running),
        ]
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn sweep_notices_crashed_and_vanished_containers(ctx: &TestHarness) {
    let crashed = ctx.running_server("crashed", "v1", None).await;
    let vanished = ctx.running_server("vanished", "v1", None).await;
    let healthy = ctx.running_server("healthy", "v1", None).await;

    ctx.runtime
        .crash(&crashed.with(|s| s.container_id.clone()).unwrap().unwrap());
    ctx.runtime
        .vanish(&vanished.with(|s| s.container_id.clone()).unwrap().unwrap());

    let changed = ctx.fleet.synchronize(&Context::system()).await.unwrap();
    assert_eq!(changed, 2);
    assert_eq!(crashed.with(|s| s.state).unwrap(), PowerState::Stopped);
    assert_eq!(vanished.with(|s| s.state).unwrap(), PowerState::Missing);
    assert_eq!(healthy.with(|s| s.state).unwrap(), PowerState::Running);

    // a second sweep has nothing left to fix
    assert_eq!(ctx.fleet.synchronize(&Context::system()).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn sweep_requires_server_management(ctx: &TestHarness) {
    let user = ctx.user("u1").await;
    let err = ctx.fleet.synchronize(&as_user(user)).await.unwrap_err();
    assert!(ReactorError::is_access_denied(&err));

    let err = ctx.fleet.synchronize(&Context::anonymous()).await.unwrap_err();
    assert!(ReactorError::is_access_denied(&err));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn services_are_swept_too(ctx: &TestHarness) {
    let system = Context::system();
    let proxy = ctx.fleet.create_service(&system, "proxy", "velocity:3").await.unwrap();
    assert!(ctx.fleet.start_service(&system, proxy.key()).await.unwrap());
    assert!(!ctx.fleet.start_service(&system, proxy.key()).await.unwrap());

    ctx.runtime
        .crash(&proxy.with(|s| s.container_id.clone()).unwrap().unwrap());
    assert_eq!(ctx.fleet.synchronize(&system).await.unwrap(), 1);
    assert_eq!(proxy.with(|s| s.state).unwrap(), PowerState::Stopped);

    ctx.fleet.remove_service(&system, proxy.key()).await.unwrap();
    assert!(ctx.fleet.service_by_name("proxy").await.unwrap().is_none());
}
