use anyhow::Result;
use async_trait::async_trait;
use reactor::{Filter, Isolation, ReactionContext, Reactor, ReactorError};
use serde_json::json;
use tracing::info;

use crate::common::changes;
use crate::domains::groups::GroupMembership;
use crate::domains::permissions::{granted, PermissionGrant, SubjectKind};
use crate::domains::users::{ChangePassword, CreateUser, RemoveUser, User};
use crate::kernel::FleetDeps;

pub struct CreateUserReactor;

#[async_trait]
impl Reactor<CreateUser, FleetDeps> for CreateUserReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &CreateUser, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let users = &ctx.deps().users;
        if users.find_one(&Filter::eq("name", event.name.as_str())).await?.is_some() {
            return Err(ReactorError::already_exists(format!("user {}", event.name)).into());
        }
        let user = users
            .insert(
                ctx.context(),
                &User {
                    name: event.name.clone(),
                    password_hash: event.password_hash.clone(),
                    admin: event.admin,
                },
            )
            .await?;
        info!(user_id = user.key(), name = %event.name, "user created");
        Ok(())
    }
}

pub struct RemoveUserReactor;

#[async_trait]
impl Reactor<RemoveUser, FleetDeps> for RemoveUserReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &RemoveUser, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let user = deps.users.get(event.user_id).await?;

        let mut groups = Vec::new();
        for membership in deps.members.load_all(&Filter::eq("user_id", event.user_id)).await? {
            groups.push(membership.with(|m| m.group_id)?);
        }
        for group_id in groups {
            ctx.raise(GroupMembership::leave(group_id, event.user_id)).await?;
        }

        for permission in granted(deps, SubjectKind::User, event.user_id).await? {
            ctx.raise(PermissionGrant::revoke(SubjectKind::User, event.user_id, permission))
                .await?;
        }

        let owned = Filter::eq("owner_id", event.user_id);
        for group in deps.groups.load_all(&owned).await? {
            deps.groups
                .update(ctx.context(), &group, changes(json!({"owner_id": null})))
                .await?;
        }
        for server in deps.servers.load_all(&owned).await? {
            deps.servers
                .update(ctx.context(), &server, changes(json!({"owner_id": null})))
                .await?;
        }

        deps.users.delete(ctx.context(), &user).await?;
        info!(user_id = event.user_id, "user removed");
        Ok(())
    }
}

pub struct ChangePasswordReactor;

#[async_trait]
impl Reactor<ChangePassword, FleetDeps> for ChangePasswordReactor {
    async fn react(&self, event: &ChangePassword, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let users = &ctx.deps().users;
        let user = users.get(event.user_id).await?;
        users
            .update(
                ctx.context(),
                &user,
                changes(json!({"password_hash": event.password_hash})),
            )
            .await?;
        info!(user_id = event.user_id, "password changed");
        Ok(())
    }
}
