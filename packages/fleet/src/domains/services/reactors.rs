use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reactor::{Filter, Isolation, ReactionContext, Reactor, ReactorError};
use serde_json::json;
use tracing::{info, warn};

use crate::common::{changes, provision};
use crate::domains::servers::PowerState;
use crate::domains::services::{CreateService, RemoveService, Service, ServicePower};
use crate::kernel::FleetDeps;

pub struct CreateServiceReactor;

#[async_trait]
impl Reactor<CreateService, FleetDeps> for CreateServiceReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &CreateService, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        if deps.services.find_one(&Filter::eq("name", event.name.as_str())).await?.is_some() {
            return Err(ReactorError::already_exists(format!("service {}", event.name)).into());
        }

        let container_id = provision(deps, "service", &event.name, &event.image, BTreeMap::new()).await?;
        let service = Service {
            name: event.name.clone(),
            image: event.image.clone(),
            container_id: Some(container_id.clone()),
            state: PowerState::Stopped,
        };
        let shadow = match deps.services.insert(ctx.context(), &service).await {
            Ok(shadow) => shadow,
            Err(e) => {
                if let Err(cleanup) = deps.runtime.remove_container(&container_id).await {
                    warn!(%container_id, error = %cleanup, "orphaned service container");
                }
                return Err(e.into());
            }
        };
        info!(service_id = shadow.key(), name = %event.name, "service created");
        Ok(())
    }
}

pub struct RemoveServiceReactor;

#[async_trait]
impl Reactor<RemoveService, FleetDeps> for RemoveServiceReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &RemoveService, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let service = deps.services.get(event.service_id).await?;
        if service.with(|s| s.state.is_running())? {
            ctx.raise(ServicePower::stop(event.service_id)).await?;
        }
        if let Some(container_id) = service.with(|s| s.container_id.clone())? {
            deps.runtime
                .remove_container(&container_id)
                .await
                .with_context(|| format!("removing container {}", container_id))?;
        }
        deps.services.delete(ctx.context(), &service).await?;
        info!(service_id = event.service_id, "service removed");
        Ok(())
    }
}

pub struct ServicePowerReactor;

#[async_trait]
impl Reactor<ServicePower, FleetDeps> for ServicePowerReactor {
    fn isolation(&self) -> Isolation {
        Isolation::Write
    }

    async fn react(&self, event: &ServicePower, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
        let deps = ctx.deps();
        let service = deps.services.get(event.service_id).await?;
        let (name, state, container_id) = service.with(|s| (s.name.clone(), s.state, s.container_id.clone()))?;
        let target = if event.direction.is_forward() {
            PowerState::Running
        } else {
            PowerState::Stopped
        };
        if state == target {
            return Err(ReactorError::already_in_state(format!("service {}", name), target.as_str()).into());
        }
        let container_id =
            container_id.ok_or_else(|| ReactorError::not_exists(format!("container of service {}", name)))?;

        if event.direction.is_forward() {
            deps.runtime.start(&container_id).await?;
        } else {
            deps.runtime.stop(&container_id).await?;
        }
        deps.services
            .update(ctx.context(), &service, changes(json!({"state": target.as_str()})))
            .await?;
        info!(service_id = event.service_id, %name, state = target.as_str(), "service power changed");
        Ok(())
    }
}
