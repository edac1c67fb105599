//! Public fleet operations.
//!
//! Every mutating method raises one top-level event on behalf of the caller's
//! [`Context`]. Operations that can legitimately have nothing to do (adding
//! an existing member, starting a running server) return `false` instead of
//! an error.

use std::sync::Arc;

use anyhow::Result;
use reactor::{Context, Engine, Filter, Isolation, ReactorError, Shadow, Storage};
use tracing::info;

use crate::common::toggled;
use crate::config::Config;
use crate::domains;
use crate::domains::groups::{CreateGroup, Group, GroupMembership, RemoveGroup};
use crate::domains::permissions::{self, PermissionGrant, SubjectKind, SERVERS_MANAGE};
use crate::domains::servers::{CreateServer, RemoveServer, Server, ServerPower, UpgradeServer};
use crate::domains::services::{CreateService, RemoveService, Service, ServicePower};
use crate::domains::sync;
use crate::domains::users::{ChangePassword, CreateUser, RemoveUser, User};
use crate::domains::volumes::{CreateVolume, RemoveVolume, Volume};
use crate::kernel::{BaseContainerRuntime, FleetDeps};

/// The fleet: engine, deps and the operations exposed to a protocol layer.
#[derive(Clone)]
pub struct Fleet {
    engine: Engine<FleetDeps>,
}

impl Fleet {
    pub fn new(config: Config, storage: Arc<dyn Storage>, runtime: Arc<dyn BaseContainerRuntime>) -> Result<Self> {
        let deps = FleetDeps::new(config, storage.clone(), runtime);
        let engine = domains::register(Engine::builder(deps, storage)).build()?;
        Ok(Self { engine })
    }

    /// Create tables, start the engine and make sure the fleet network exists.
    pub async fn start(&self) -> Result<()> {
        self.deps().create_tables().await?;
        self.engine.start().await?;
        self.ensure_network().await?;
        info!("fleet started");
        Ok(())
    }

    pub fn engine(&self) -> &Engine<FleetDeps> {
        &self.engine
    }

    pub fn deps(&self) -> &FleetDeps {
        self.engine.deps()
    }

    async fn ensure_network(&self) -> Result<()> {
        let deps = self.deps();
        let network = &deps.config.network;
        if !deps.runtime.list_networks().await?.contains(network) {
            deps.runtime.create_network(network).await?;
            info!(%network, "fleet network created");
        }
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn create_user(
        &self,
        ctx: &Context,
        name: &str,
        password_hash: Option<String>,
        admin: bool,
    ) -> Result<Arc<Shadow<User>>> {
        self.engine
            .raise(
                ctx,
                CreateUser {
                    name: name.to_string(),
                    password_hash,
                    admin,
                },
            )
            .await?;
        required(self.user_by_name(name).await?, "user", name)
    }

    pub async fn remove_user(&self, ctx: &Context, user_id: i64) -> Result<()> {
        self.engine.raise(ctx, RemoveUser { user_id }).await
    }

    pub async fn change_password(&self, ctx: &Context, user_id: i64, password_hash: &str) -> Result<()> {
        self.engine
            .raise(
                ctx,
                ChangePassword {
                    user_id,
                    password_hash: password_hash.to_string(),
                },
            )
            .await
    }

    pub async fn user_by_name(&self, name: &str) -> Result<Option<Arc<Shadow<User>>>> {
        Ok(self.deps().users.find_one(&Filter::eq("name", name)).await?)
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// `false` if a group with this name already exists.
    pub async fn create_group(&self, ctx: &Context, name: &str, owner_id: Option<i64>) -> Result<bool> {
        toggled(
            self.engine
                .raise(
                    ctx,
                    CreateGroup {
                        name: name.to_string(),
                        owner_id,
                    },
                )
                .await,
        )
    }

    /// `false` if there is no such group.
    pub async fn remove_group(&self, ctx: &Context, group_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, RemoveGroup { group_id }).await)
    }

    /// `false` if the user already is a member.
    pub async fn add_member(&self, ctx: &Context, group_id: i64, user_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, GroupMembership::join(group_id, user_id)).await)
    }

    /// `false` if the user is not a member.
    pub async fn remove_member(&self, ctx: &Context, group_id: i64, user_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, GroupMembership::leave(group_id, user_id)).await)
    }

    pub async fn group_by_name(&self, name: &str) -> Result<Option<Arc<Shadow<Group>>>> {
        Ok(self.deps().groups.find_one(&Filter::eq("name", name)).await?)
    }

    /// User ids of the members of a group.
    pub async fn members(&self, group_id: i64) -> Result<Vec<i64>> {
        let mut members = Vec::new();
        for membership in self
            .deps()
            .members
            .load_all(&Filter::eq("group_id", group_id))
            .await?
        {
            members.push(membership.with(|m| m.user_id)?);
        }
        Ok(members)
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// `false` if the subject already holds the permission.
    pub async fn grant(&self, ctx: &Context, kind: SubjectKind, id: i64, permission: &str) -> Result<bool> {
        toggled(self.engine.raise(ctx, PermissionGrant::grant(kind, id, permission)).await)
    }

    /// `false` if the subject does not hold the permission.
    pub async fn revoke(&self, ctx: &Context, kind: SubjectKind, id: i64, permission: &str) -> Result<bool> {
        toggled(self.engine.raise(ctx, PermissionGrant::revoke(kind, id, permission)).await)
    }

    /// True if the acting identity holds `permission`.
    pub async fn has_permission(&self, ctx: &Context, permission: &str) -> Result<bool> {
        permissions::has_permission(self.deps(), ctx.identity(), permission).await
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(&self, ctx: &Context, name: &str) -> Result<Arc<Shadow<Volume>>> {
        self.engine
            .raise(ctx, CreateVolume { name: name.to_string() })
            .await?;
        required(self.volume_by_name(name).await?, "volume", name)
    }

    pub async fn remove_volume(&self, ctx: &Context, volume_id: i64) -> Result<()> {
        self.engine.raise(ctx, RemoveVolume { volume_id }).await
    }

    pub async fn volume_by_name(&self, name: &str) -> Result<Option<Arc<Shadow<Volume>>>> {
        Ok(self.deps().volumes.find_one(&Filter::eq("name", name)).await?)
    }

    // =========================================================================
    // Servers
    // =========================================================================

    pub async fn create_server(
        &self,
        ctx: &Context,
        name: &str,
        image: &str,
        owner_id: Option<i64>,
        volume_id: Option<i64>,
    ) -> Result<Arc<Shadow<Server>>> {
        self.engine
            .raise(
                ctx,
                CreateServer {
                    name: name.to_string(),
                    image: image.to_string(),
                    owner_id,
                    volume_id,
                },
            )
            .await?;
        required(self.server_by_name(name).await?, "server", name)
    }

    /// `false` if the server is already running.
    pub async fn start_server(&self, ctx: &Context, server_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, ServerPower::start(server_id)).await)
    }

    /// `false` if the server is already stopped.
    pub async fn stop_server(&self, ctx: &Context, server_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, ServerPower::stop(server_id)).await)
    }

    /// Move a server to `image`, keeping its power state. On failure every
    /// step taken so far is undone.
    pub async fn upgrade_server(&self, ctx: &Context, server_id: i64, image: &str) -> Result<()> {
        self.engine
            .raise(
                ctx,
                UpgradeServer {
                    server_id,
                    image: image.to_string(),
                },
            )
            .await
    }

    pub async fn remove_server(&self, ctx: &Context, server_id: i64) -> Result<()> {
        self.engine.raise(ctx, RemoveServer { server_id }).await
    }

    pub async fn server_by_name(&self, name: &str) -> Result<Option<Arc<Shadow<Server>>>> {
        Ok(self.deps().servers.find_one(&Filter::eq("name", name)).await?)
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub async fn create_service(&self, ctx: &Context, name: &str, image: &str) -> Result<Arc<Shadow<Service>>> {
        self.engine
            .raise(
                ctx,
                CreateService {
                    name: name.to_string(),
                    image: image.to_string(),
                },
            )
            .await?;
        required(self.service_by_name(name).await?, "service", name)
    }

    /// `false` if the service is already running.
    pub async fn start_service(&self, ctx: &Context, service_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, ServicePower::start(service_id)).await)
    }

    /// `false` if the service is already stopped.
    pub async fn stop_service(&self, ctx: &Context, service_id: i64) -> Result<bool> {
        toggled(self.engine.raise(ctx, ServicePower::stop(service_id)).await)
    }

    pub async fn remove_service(&self, ctx: &Context, service_id: i64) -> Result<()> {
        self.engine.raise(ctx, RemoveService { service_id }).await
    }

    pub async fn service_by_name(&self, name: &str) -> Result<Option<Arc<Shadow<Service>>>> {
        Ok(self.deps().services.find_one(&Filter::eq("name", name)).await?)
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Sweep the runtime into `ContainerObserved` facts and correct recorded
    /// power states. Returns how many servers and services changed.
    pub async fn synchronize(&self, ctx: &Context) -> Result<usize> {
        if !permissions::has_permission(self.deps(), ctx.identity(), SERVERS_MANAGE).await? {
            return Err(ReactorError::access_denied("synchronize").into());
        }
        self.engine
            .reaction(ctx, Isolation::Write, |rctx| async move { sync::synchronize(&rctx).await })
            .await
    }
}

fn required<T>(found: Option<T>, what: &str, name: &str) -> Result<T> {
    found.ok_or_else(|| ReactorError::not_exists(format!("{} {}", what, name)).into())
}
