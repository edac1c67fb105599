use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reactor::{Filter, Isolation, ReactionContext, Reactor, ReactorError};
use tracing::info;

use crate::domains::volumes::{CreateVolume, RemoveVolume, Volume};
use crate::kernel::FleetDeps;

pub struct CreateVolumeReactor;

#[async_trait]
impl Reactor<CreateVolume, FleetDeps> for CreateVolumeReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &CreateVolume, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        if deps.volumes.find_one(&Filter::eq("name", event.name.as_str())).await?.is_some() {
            return Err(ReactorError::already_exists(format!("volume {}", event.name)).into());
        }

        let runtime_name = deps.config.runtime_name(&event.name);
        deps.runtime
            .create_volume(&runtime_name)
            .await
            .with_context(|| format!("creating runtime volume {}", runtime_name))?;

        let volume = deps
            .volumes
            .insert(
                ctx.context(),
                &Volume {
                    name: event.name.clone(),
                    runtime_name: runtime_name.clone(),
                },
            )
            .await?;
        info!(volume_id = volume.key(), %runtime_name, "volume created");
        Ok(())
    }
}

pub struct RemoveVolumeReactor;

#[async_trait]
impl Reactor<RemoveVolume, FleetDeps> for RemoveVolumeReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &RemoveVolume, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let volume = deps.volumes.get(event.volume_id).await?;
        let mounted = deps.servers.load_all(&Filter::eq("volume_id", event.volume_id)).await?;
        if !mounted.is_empty() {
            let name = volume.with(|v| v.name.clone())?;
            return Err(ReactorError::already_in_state(format!("volume {}", name), "in use").into());
        }

        let runtime_name = volume.with(|v| v.runtime_name.clone())?;
        deps.runtime
            .remove_volume(&runtime_name)
            .await
            .with_context(|| format!("removing runtime volume {}", runtime_name))?;
        deps.volumes.delete(ctx.context(), &volume).await?;
        info!(volume_id = event.volume_id, %runtime_name, "volume removed");
        Ok(())
    }
}
