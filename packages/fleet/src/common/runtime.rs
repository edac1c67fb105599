//! Helpers shared by the reactors that drive the container runtime.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::kernel::{BaseContainerRuntime, ContainerInfo, ContainerSpec, FleetDeps};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Labels marking a container as managed by this fleet.
///
/// With `kind` and `name` unset this is the selector for every managed
/// container.
pub fn managed_labels(config: &Config, kind: Option<&str>, name: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(config.label("managed"), "true".to_string());
    if let Some(kind) = kind {
        labels.insert(config.label("kind"), kind.to_string());
    }
    if let Some(name) = name {
        labels.insert(config.label("name"), name.to_string());
    }
    labels
}

/// Wait up to `timeout` for a freshly created container to show up in
/// `inspect`.
///
/// Best effort: on timeout this logs and returns `None` rather than failing.
pub async fn wait_until_inspectable(
    runtime: &dyn BaseContainerRuntime,
    id: &str,
    timeout: Duration,
) -> Result<Option<ContainerInfo>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(info) = runtime.inspect(id).await? {
            debug!(container_id = %id, "container is inspectable");
            return Ok(Some(info));
        }
        if Instant::now() >= deadline {
            warn!(container_id = %id, ?timeout, "container did not become inspectable in time");
            return Ok(None);
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Create the container of a managed `kind` (server, service) on the fleet
/// network and wait for it to settle.
///
/// `mounts` maps runtime volume names to mount paths.
pub async fn provision(
    deps: &FleetDeps,
    kind: &str,
    name: &str,
    image: &str,
    mounts: BTreeMap<String, String>,
) -> Result<String> {
    let spec = ContainerSpec {
        name: deps.config.runtime_name(name),
        image: image.to_string(),
        labels: managed_labels(&deps.config, Some(kind), Some(name)),
        mounts,
        network: Some(deps.config.network.clone()),
    };
    let id = deps
        .runtime
        .create_container(&spec)
        .await
        .with_context(|| format!("creating {} container {}", kind, spec.name))?;
    wait_until_inspectable(deps.runtime.as_ref(), &id, deps.config.settle_timeout).await?;
    debug!(%kind, %name, %image, container_id = %id, "container provisioned");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ContainerSpec, SimulatedRuntime};

    #[test]
    fn test_managed_labels() {
        let config = Config::default();
        let labels = managed_labels(&config, Some("server"), Some("survival"));
        assert_eq!(labels.get("fleet.managed").map(String::as_str), Some("true"));
        assert_eq!(labels.get("fleet.kind").map(String::as_str), Some("server"));
        assert_eq!(labels.get("fleet.name").map(String::as_str), Some("survival"));
        assert_eq!(managed_labels(&config, None, None).len(), 1);
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_timeout() {
        let runtime = SimulatedRuntime::new();
        runtime.set_inspect_delay(Duration::from_secs(60));
        let id = runtime
            .create_container(&ContainerSpec {
                name: "slow".into(),
                image: "img".into(),
                ..ContainerSpec::default()
            })
            .await
            .unwrap();

        let seen = wait_until_inspectable(&runtime, &id, Duration::from_millis(60))
            .await
            .unwrap();
        assert!(seen.is_none());
    }
}
