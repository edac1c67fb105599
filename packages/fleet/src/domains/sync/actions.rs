use std::collections::HashMap;

use anyhow::Result;
use reactor::{Filter, ReactionContext};
use serde_json::json;
use tracing::{debug, info};

use crate::common::{changes, managed_labels};
use crate::domains::servers::PowerState;
use crate::domains::sync::ContainerObserved;
use crate::kernel::FleetDeps;

/// Record every managed container and bring recorded power states in line
/// with the runtime. Returns how many servers and services changed state.
///
/// Must run inside a Write reaction.
pub async fn synchronize(ctx: &ReactionContext<FleetDeps>) -> Result<usize> {
    let deps = ctx.deps();
    let kind_label = deps.config.label("kind");
    let containers = deps
        .runtime
        .list_by_label(&managed_labels(&deps.config, None, None))
        .await?;

    let mut observed = HashMap::new();
    for container in containers {
        let state = PowerState::from(Some(container.state));
        ctx.raise(ContainerObserved {
            container_id: container.id.clone(),
            name: container.name.clone(),
            kind: container.labels.get(&kind_label).cloned(),
            state,
        })
        .await?;
        observed.insert(container.id, state);
    }
    debug!(containers = observed.len(), "runtime swept");

    let mut changed = 0;
    for server in deps.servers.load_all(&Filter::all()).await? {
        let (recorded, container_id) = server.with(|s| (s.state, s.container_id.clone()))?;
        let actual = actual_state(&observed, container_id.as_deref());
        if actual != recorded {
            deps.servers
                .update(ctx.context(), &server, changes(json!({"state": actual.as_str()})))
                .await?;
            info!(server_id = server.key(), from = recorded.as_str(), to = actual.as_str(), "server state synchronized");
            changed += 1;
        }
    }
    for service in deps.services.load_all(&Filter::all()).await? {
        let (recorded, container_id) = service.with(|s| (s.state, s.container_id.clone()))?;
        let actual = actual_state(&observed, container_id.as_deref());
        if actual != recorded {
            deps.services
                .update(ctx.context(), &service, changes(json!({"state": actual.as_str()})))
                .await?;
            info!(service_id = service.key(), from = recorded.as_str(), to = actual.as_str(), "service state synchronized");
            changed += 1;
        }
    }
    Ok(changed)
}

fn actual_state(observed: &HashMap<String, PowerState>, container_id: Option<&str>) -> PowerState {
    container_id
        .and_then(|id| observed.get(id).copied())
        .unwrap_or(PowerState::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unobserved_containers_are_missing() {
        let mut observed = HashMap::new();
        observed.insert("sim-000001".to_string(), PowerState::Running);
        assert_eq!(actual_state(&observed, Some("sim-000001")), PowerState::Running);
        assert_eq!(actual_state(&observed, Some("sim-000002")), PowerState::Missing);
        assert_eq!(actual_state(&observed, None), PowerState::Missing);
    }
}
