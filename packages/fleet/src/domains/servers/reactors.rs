use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reactor::{Filter, Isolation, ReactionContext, Reactor, ReactorError, Shadow};
use serde_json::json;
use tracing::{error, info, warn};

use crate::common::{changes, provision};
use crate::domains::servers::{
    ChangeServerImage, CreateServer, PowerState, RemoveServer, Server, ServerPower, UpgradeServer,
};
use crate::kernel::FleetDeps;

/// Mount point of a server's data volume.
pub const DATA_PATH: &str = "/data";

const KIND: &str = "server";

fn container_of(server: &Shadow<Server>) -> Result<String> {
    server
        .with(|s| s.container_id.clone())?
        .ok_or_else(|| ReactorError::not_exists(format!("container of server #{}", server.key())).into())
}

async fn mounts(deps: &FleetDeps, server: &Server) -> Result<BTreeMap<String, String>> {
    let mut mounts = BTreeMap::new();
    if let Some(volume_id) = server.volume_id {
        let volume = deps.volumes.get(volume_id).await?;
        mounts.insert(volume.with(|v| v.runtime_name.clone())?, DATA_PATH.to_string());
    }
    Ok(mounts)
}

pub struct CreateServerReactor;

#[async_trait]
impl Reactor<CreateServer, FleetDeps> for CreateServerReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &CreateServer, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        if deps.servers.find_one(&Filter::eq("name", event.name.as_str())).await?.is_some() {
            return Err(ReactorError::already_exists(format!("server {}", event.name)).into());
        }
        if let Some(owner_id) = event.owner_id {
            deps.users.get(owner_id).await?;
        }

        let mut server = Server {
            name: event.name.clone(),
            image: event.image.clone(),
            volume_id: event.volume_id,
            owner_id: event.owner_id,
            container_id: None,
            state: PowerState::Stopped,
        };
        let mounts = mounts(deps, &server).await?;
        let container_id = provision(deps, KIND, &event.name, &event.image, mounts).await?;
        server.container_id = Some(container_id.clone());

        let shadow = match deps.servers.insert(ctx.context(), &server).await {
            Ok(shadow) => shadow,
            Err(e) => {
                if let Err(cleanup) = deps.runtime.remove_container(&container_id).await {
                    warn!(%container_id, error = %cleanup, "orphaned server container");
                }
                return Err(e.into());
            }
        };
        info!(server_id = shadow.key(), name = %event.name, image = %event.image, "server created");
        Ok(())
    }
}

pub struct RemoveServerReactor;

#[async_trait]
impl Reactor<RemoveServer, FleetDeps> for RemoveServerReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &RemoveServer, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let server = deps.servers.get(event.server_id).await?;
        if server.with(|s| s.state.is_running())? {
            ctx.raise(ServerPower::stop(event.server_id)).await?;
        }

        if let Some(container_id) = server.with(|s| s.container_id.clone())? {
            deps.runtime
                .remove_container(&container_id)
                .await
                .with_context(|| format!("removing container {}", container_id))?;
        }
        deps.servers.delete(ctx.context(), &server).await?;
        info!(server_id = event.server_id, "server removed");
        Ok(())
    }
}

pub struct ServerPowerReactor;

#[async_trait]
impl Reactor<ServerPower, FleetDeps> for ServerPowerReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &ServerPower, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let server = deps.servers.get(event.server_id).await?;
        let (name, state) = server.with(|s| (s.name.clone(), s.state))?;
        let target = if event.direction.is_forward() {
            PowerState::Running
        } else {
            PowerState::Stopped
        };
        if state == target {
            return Err(ReactorError::already_in_state(format!("server {}", name), target.as_str()).into());
        }

        let container_id = container_of(&server)?;
        if event.direction.is_forward() {
            deps.runtime.start(&container_id).await?;
        } else {
            deps.runtime.stop(&container_id).await?;
        }
        deps.servers
            .update(ctx.context(), &server, changes(json!({"state": target.as_str()})))
            .await?;
        info!(server_id = event.server_id, %name, state = target.as_str(), "server power changed");
        Ok(())
    }
}

pub struct ChangeServerImageReactor;

#[async_trait]
impl Reactor<ChangeServerImage, FleetDeps> for ChangeServerImageReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &ChangeServerImage, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let server = deps.servers.get(event.server_id).await?;
        let current = server.snapshot()?;
        let target = event
            .target()
            .ok_or_else(|| ReactorError::not_exists(format!("previous image of server {}", current.name)))?;
        if current.image == target {
            return Err(ReactorError::already_in_state(format!("server {}", current.name), target).into());
        }

        if let Some(old) = &current.container_id {
            deps.runtime
                .remove_container(old)
                .await
                .with_context(|| format!("removing container {}", old))?;
        }
        let mounts = mounts(deps, &current).await?;
        let container_id = match provision(deps, KIND, &current.name, target, mounts.clone()).await {
            Ok(container_id) => container_id,
            Err(e) => return Err(restore_container(ctx, &server, &current, mounts, e).await),
        };
        deps.servers
            .update(
                ctx.context(),
                &server,
                changes(json!({
                    "image": target,
                    "container_id": container_id,
                    "state": PowerState::Stopped.as_str(),
                })),
            )
            .await?;
        info!(server_id = event.server_id, from = %current.image, to = %target, "server image changed");

        if current.state.is_running() {
            if let Err(e) = deps.runtime.start(&container_id).await {
                if let Err(cleanup) = deps.runtime.remove_container(&container_id).await {
                    warn!(%container_id, error = %cleanup, "orphaned server container");
                }
                return Err(restore_container(ctx, &server, &current, mounts, e).await);
            }
            deps.servers
                .update(ctx.context(), &server, changes(json!({"state": PowerState::Running.as_str()})))
                .await?;
        }
        Ok(())
    }
}

/// Put a server whose old container is already gone back on `previous`,
/// in its previous power state, and return `error`. Failed events are
/// never compensated.
async fn restore_container(
    ctx: &ReactionContext<FleetDeps>,
    server: &Shadow<Server>,
    previous: &Server,
    mounts: BTreeMap<String, String>,
    error: anyhow::Error,
) -> anyhow::Error {
    let deps = ctx.deps();
    warn!(server_id = server.key(), image = %previous.image, error = %error, "image change failed, restoring container");

    let container_id = match provision(deps, KIND, &previous.name, &previous.image, mounts).await {
        Ok(container_id) => container_id,
        Err(restore) => {
            error!(server_id = server.key(), error = %restore, "restoring server container failed");
            if let Err(e) = deps
                .servers
                .update(
                    ctx.context(),
                    server,
                    changes(json!({
                        "image": previous.image,
                        "container_id": null,
                        "state": PowerState::Stopped.as_str(),
                    })),
                )
                .await
            {
                warn!(server_id = server.key(), error = %e, "clearing container of server failed");
            }
            return error.context(format!("restoring container of server {} failed: {:#}", previous.name, restore));
        }
    };

    let mut state = PowerState::Stopped;
    if previous.state.is_running() {
        match deps.runtime.start(&container_id).await {
            Ok(()) => state = PowerState::Running,
            Err(e) => warn!(%container_id, error = %e, "restored server container did not start"),
        }
    }
    if let Err(e) = deps
        .servers
        .update(
            ctx.context(),
            server,
            changes(json!({
                "image": previous.image,
                "container_id": container_id,
                "state": state.as_str(),
            })),
        )
        .await
    {
        return error.context(format!("recording restored container of server {} failed: {:#}", previous.name, e));
    }
    error
}

pub struct UpgradeServerReactor;

#[async_trait]
impl Reactor<UpgradeServer, FleetDeps> for UpgradeServerReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &UpgradeServer, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let server = ctx.deps().servers.get(event.server_id).await?;
        let (image, running) = server.with(|s| (s.image.clone(), s.state.is_running()))?;
        if image == event.image {
            return Err(ReactorError::already_in_state(format!("server #{}", event.server_id), image).into());
        }

        if running {
            ctx.raise(ServerPower::stop(event.server_id)).await?;
        }
        ctx.raise(ChangeServerImage::new(event.server_id, event.image.as_str()))
            .await?;
        if running {
            ctx.raise(ServerPower::start(event.server_id)).await?;
        }
        info!(server_id = event.server_id, from = %image, to = %event.image, "server upgraded");
        Ok(())
    }
}
