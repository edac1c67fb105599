use anyhow::Result;
use async_trait::async_trait;
use reactor::{Filter, Isolation, ReactionContext, Reactor, ReactorError};
use tracing::info;

use crate::domains::groups::{CreateGroup, Group, GroupMembership, Membership, RemoveGroup};
use crate::domains::permissions::{granted, PermissionGrant, SubjectKind};
use crate::kernel::FleetDeps;

pub struct CreateGroupReactor;

#[async_trait]
impl Reactor<CreateGroup, FleetDeps> for CreateGroupReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &CreateGroup, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        if deps.groups.find_one(&Filter::eq("name", event.name.as_str())).await?.is_some() {
            return Err(ReactorError::already_exists(format!("group {}", event.name)).into());
        }
        if let Some(owner_id) = event.owner_id {
            deps.users.get(owner_id).await?;
        }
        let group = deps
            .groups
            .insert(
                ctx.context(),
                &Group {
                    name: event.name.clone(),
                    owner_id: event.owner_id,
                },
            )
            .await?;
        info!(group_id = group.key(), name = %event.name, "group created");
        Ok(())
    }
}

pub struct RemoveGroupReactor;

#[async_trait]
impl Reactor<RemoveGroup, FleetDeps> for RemoveGroupReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &RemoveGroup, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let group = deps.groups.get(event.group_id).await?;

        let mut members = Vec::new();
        for membership in deps.members.load_all(&Filter::eq("group_id", event.group_id)).await? {
            members.push(membership.with(|m| m.user_id)?);
        }
        for user_id in members {
            ctx.raise(GroupMembership::leave(event.group_id, user_id)).await?;
        }
        for permission in granted(deps, SubjectKind::Group, event.group_id).await? {
            ctx.raise(PermissionGrant::revoke(SubjectKind::Group, event.group_id, permission))
                .await?;
        }

        deps.groups.delete(ctx.context(), &group).await?;
        info!(group_id = event.group_id, "group removed");
        Ok(())
    }
}

pub struct GroupMembershipReactor;

#[async_trait]
impl Reactor<GroupMembership, FleetDeps> for GroupMembershipReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &GroupMembership, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let filter = Filter::eq("group_id", event.group_id).and_eq("user_id", event.user_id);
        let existing = deps.members.find_one(&filter).await?;
        let member = format!("user #{} of group #{}", event.user_id, event.group_id);

        if event.direction.is_forward() {
            if existing.is_some() {
                return Err(ReactorError::already_in_state(member, "member").into());
            }
            deps.groups.get(event.group_id).await?;
            deps.users.get(event.user_id).await?;
            deps.members
                .insert(
                    ctx.context(),
                    &Membership {
                        group_id: event.group_id,
                        user_id: event.user_id,
                    },
                )
                .await?;
            info!(group_id = event.group_id, user_id = event.user_id, "member added");
        } else {
            let Some(membership) = existing else {
                return Err(ReactorError::not_exists(member).into());
            };
            deps.members.delete(ctx.context(), &membership).await?;
            info!(group_id = event.group_id, user_id = event.user_id, "member removed");
        }
        Ok(())
    }
}
