use anyhow::Result;
use async_trait::async_trait;
use reactor::{Context, Verdict, Veto};

use crate::domains::groups::{GroupMembership, RemoveGroup};
use crate::kernel::FleetDeps;

/// Group owners may manage their own group.
pub struct GroupOwner;

impl GroupOwner {
    async fn owns(deps: &FleetDeps, ctx: &Context, group_id: i64) -> Result<Verdict> {
        let Some(user_id) = ctx.identity().user_id() else {
            return Ok(Verdict::Unknown);
        };
        let owner = match deps.groups.get_or_null(group_id).await? {
            Some(group) => group.with(|g| g.owner_id)?,
            None => None,
        };
        Ok(Verdict::allow_if(owner == Some(user_id)))
    }
}

#[async_trait]
impl Veto<GroupMembership, FleetDeps> for GroupOwner {
    async fn impose(&self, event: &GroupMembership, deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        Self::owns(deps, ctx, event.group_id).await
    }
}

#[async_trait]
impl Veto<RemoveGroup, FleetDeps> for GroupOwner {
    async fn impose(&self, event: &RemoveGroup, deps: &FleetDeps, ctx: &Context) -> Result<Verdict> {
        Self::owns(deps, ctx, event.group_id).await
    }
}
