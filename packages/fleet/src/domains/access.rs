//! Access rules shared by every fleet event.
//!
//! Anonymous identities are denied outright. Administrators are allowed
//! everything. Everyone else needs a rule that allows the specific event:
//! self service on their own account, ownership of a server or group, or a
//! management permission.

use anyhow::Result;
use async_trait::async_trait;
use reactor::{Context, EngineBuilder, Event, Identity, InterfaceVeto, Row, Verdict, Veto};
use serde_json::Value;

use crate::common::{SERVER_CONTROL, SERVER_EVENT, USER_EVENT};
use crate::domains::permissions::{has_permission, ADMIN, SERVERS_MANAGE};
use crate::kernel::FleetDeps;

/// Denies every event raised by an anonymous identity.
pub struct DenyAnonymous;

#[async_trait]
impl<E: Event> Veto<E, FleetDeps> for DenyAnonymous {
    async fn impose(&self, _event: &E, _deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        Ok(match ctx.identity() {
            Identity::Anonymous => Verdict::Deny,
            _ => Verdict::Unknown,
        })
    }
}

/// Allows every event raised by an administrator: a user flagged `admin`
/// or any subject holding the `admin` permission.
pub struct Administrators;

#[async_trait]
impl<E: Event> Veto<E, FleetDeps> for Administrators {
    async fn impose(&self, _event: &E, deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        Ok(Verdict::allow_if(has_permission(deps, ctx.identity(), ADMIN).await?))
    }
}

/// Allows holders of a permission.
pub struct RequiresPermission(pub &'static str);

#[async_trait]
impl<E: Event> Veto<E, FleetDeps> for RequiresPermission {
    async fn impose(&self, _event: &E, deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        Ok(Verdict::allow_if(has_permission(deps, ctx.identity(), self.0).await?))
    }
}

/// Users may act on their own account.
pub struct SelfService;

#[async_trait]
impl InterfaceVeto<FleetDeps> for SelfService {
    async fn impose(&self, row: &Row, _deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        let subject = row.get("user_id").and_then(Value::as_i64);
        Ok(Verdict::allow_if(
            subject.is_some() && ctx.identity().user_id() == subject,
        ))
    }
}

/// Server owners may operate their servers.
pub struct ServerOwner;

#[async_trait]
impl InterfaceVeto<FleetDeps> for ServerOwner {
    async fn impose(&self, row: &Row, deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        let (Some(server_id), Some(user_id)) =
            (row.get("server_id").and_then(Value::as_i64), ctx.identity().user_id())
        else {
            return Ok(Verdict::Unknown);
        };
        let owner = match deps.servers.get_or_null(server_id).await? {
            Some(server) => server.with(|s| s.owner_id)?,
            None => None,
        };
        Ok(Verdict::allow_if(owner == Some(user_id)))
    }
}

/// Holders of `servers.manage` may do anything to any server.
pub struct ServerManagers;

#[async_trait]
impl InterfaceVeto<FleetDeps> for ServerManagers {
    async fn impose(&self, _row: &Row, deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        Ok(Verdict::allow_if(
            has_permission(deps, ctx.identity(), SERVERS_MANAGE).await?,
        ))
    }
}

/// Attach the rules every event shares.
pub fn guarded<E: Event>(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    builder
        .with_veto::<E, _>(DenyAnonymous)
        .with_veto::<E, _>(Administrators)
}

/// Attach the interface rules.
pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    builder
        .with_interface_veto(&USER_EVENT, SelfService)
        .with_interface_veto(&SERVER_CONTROL, ServerOwner)
        .with_interface_veto(&SERVER_EVENT, ServerManagers)
}
