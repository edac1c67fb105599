//! In-process container runtime.
//!
//! Keeps containers, volumes and networks in memory and follows the state
//! rules of a real engine closely enough for the fleet to run against it:
//! start/stop are idempotent, pause/resume require a running container, and
//! removal of unknown objects succeeds. Faults can be injected per operation
//! (optionally only for one image) and new containers can be made invisible
//! to `inspect` for a while, like a slow engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tracing::{debug, trace};

use super::traits::{Attachment, BaseContainerRuntime, ContainerInfo, ContainerSpec, ContainerState};

/// Runtime operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Create,
    Start,
    Stop,
    Pause,
    Resume,
    Kill,
    Remove,
    Attach,
    CreateVolume,
    RemoveVolume,
    CreateNetwork,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such container {0}")]
    NoSuchContainer(String),

    #[error("container name {0} is already in use")]
    NameInUse(String),

    #[error("container {id} is {state:?}")]
    InvalidState { id: String, state: ContainerState },

    #[error("no such volume {0}")]
    NoSuchVolume(String),

    #[error("volume {0} is in use")]
    VolumeInUse(String),

    #[error("injected {op:?} failure")]
    Injected { op: RuntimeOp },
}

#[derive(Debug, Clone)]
struct Fault {
    op: RuntimeOp,
    image: Option<String>,
}

struct SimContainer {
    info: ContainerInfo,
    mounts: BTreeMap<String, String>,
    visible_at: Instant,
}

/// Simulated container engine with fault injection.
#[derive(Default)]
pub struct SimulatedRuntime {
    containers: DashMap<String, SimContainer>,
    volumes: DashSet<String>,
    networks: DashSet<String>,
    next_id: AtomicU64,
    faults: Mutex<Vec<Fault>>,
    inspect_delay: Mutex<Duration>,
    log: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `op` from now on, for any image.
    pub fn fail(&self, op: RuntimeOp) {
        locked(&self.faults).push(Fault { op, image: None });
    }

    /// Fail every `op` on containers running `image`.
    pub fn fail_for_image(&self, op: RuntimeOp, image: &str) {
        locked(&self.faults).push(Fault {
            op,
            image: Some(image.to_string()),
        });
    }

    pub fn clear_faults(&self) {
        locked(&self.faults).clear();
    }

    /// Hide new containers from `inspect` for `delay` after creation.
    pub fn set_inspect_delay(&self, delay: Duration) {
        *locked(&self.inspect_delay) = delay;
    }

    /// Successful operations, in order, e.g. `"start sim-000001"`.
    pub fn operations(&self) -> Vec<String> {
        locked(&self.log).clone()
    }

    /// Make a container exit as if its process died.
    pub fn crash(&self, id: &str) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.info.state = ContainerState::Exited;
        }
    }

    /// Drop a container behind the fleet's back.
    pub fn vanish(&self, id: &str) {
        self.containers.remove(id);
    }

    pub fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.containers.get(id).map(|c| c.info.clone())
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    fn check(&self, op: RuntimeOp, image: Option<&str>) -> Result<(), RuntimeError> {
        let faults = locked(&self.faults);
        let hit = faults
            .iter()
            .any(|f| f.op == op && (f.image.is_none() || f.image.as_deref() == image));
        if hit {
            debug!(?op, ?image, "injecting runtime fault");
            return Err(RuntimeError::Injected { op });
        }
        Ok(())
    }

    fn record(&self, entry: String) {
        trace!(operation = %entry, "simulated runtime");
        locked(&self.log).push(entry);
    }

    /// Apply `transition` to the state of container `id`.
    fn transition(
        &self,
        op: RuntimeOp,
        id: &str,
        transition: impl FnOnce(ContainerState) -> Option<ContainerState>,
    ) -> Result<()> {
        let mut container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        self.check(op, Some(&container.info.image))?;
        let state = container.info.state;
        let next = transition(state).ok_or_else(|| RuntimeError::InvalidState {
            id: id.to_string(),
            state,
        })?;
        container.info.state = next;
        drop(container);
        self.record(format!("{} {}", format!("{:?}", op).to_lowercase(), id));
        Ok(())
    }
}

#[async_trait]
impl BaseContainerRuntime for SimulatedRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.check(RuntimeOp::Create, Some(&spec.image))?;
        if self.containers.iter().any(|c| c.info.name == spec.name) {
            return Err(RuntimeError::NameInUse(spec.name.clone()).into());
        }
        if let Some(missing) = spec.mounts.keys().find(|v| !self.volumes.contains(*v)) {
            return Err(RuntimeError::NoSuchVolume(missing.clone()).into());
        }

        let id = format!("sim-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let delay = *locked(&self.inspect_delay);
        self.containers.insert(
            id.clone(),
            SimContainer {
                info: ContainerInfo {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    state: ContainerState::Created,
                    labels: spec.labels.clone(),
                },
                mounts: spec.mounts.clone(),
                visible_at: Instant::now() + delay,
            },
        );
        self.record(format!("create {} {}", id, spec.image));
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.transition(RuntimeOp::Start, id, |state| match state {
            ContainerState::Paused => None,
            _ => Some(ContainerState::Running),
        })
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.transition(RuntimeOp::Stop, id, |state| match state {
            ContainerState::Created => Some(ContainerState::Created),
            _ => Some(ContainerState::Exited),
        })
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.transition(RuntimeOp::Pause, id, |state| match state {
            ContainerState::Running | ContainerState::Paused => Some(ContainerState::Paused),
            _ => None,
        })
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.transition(RuntimeOp::Resume, id, |state| match state {
            ContainerState::Paused | ContainerState::Running => Some(ContainerState::Running),
            _ => None,
        })
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.transition(RuntimeOp::Kill, id, |_| Some(ContainerState::Exited))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let image = self.containers.get(id).map(|c| c.info.image.clone());
        self.check(RuntimeOp::Remove, image.as_deref())?;
        if self.containers.remove(id).is_some() {
            self.record(format!("remove {}", id));
        }
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerInfo>> {
        Ok(self
            .containers
            .get(id)
            .filter(|c| Instant::now() >= c.visible_at)
            .map(|c| c.info.clone()))
    }

    async fn attach(&self, id: &str) -> Result<Attachment> {
        let container = self
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        self.check(RuntimeOp::Attach, Some(&container.info.image))?;
        if container.info.state != ContainerState::Running {
            return Err(RuntimeError::InvalidState {
                id: id.to_string(),
                state: container.info.state,
            }
            .into());
        }
        drop(container);

        // The simulated console echoes stdin back on stdout.
        let (stdin, mut console_in) = tokio::io::duplex(4096);
        let (stdout, mut console_out) = tokio::io::duplex(4096);
        let (stderr, _console_err) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut console_in, &mut console_out).await;
        });
        self.record(format!("attach {}", id));
        Ok(Attachment {
            stdin,
            stdout,
            stderr,
        })
    }

    async fn list_by_label(&self, labels: &BTreeMap<String, String>) -> Result<Vec<ContainerInfo>> {
        let mut found: Vec<ContainerInfo> = self
            .containers
            .iter()
            .filter(|c| labels.iter().all(|(k, v)| c.info.labels.get(k) == Some(v)))
            .map(|c| c.info.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.check(RuntimeOp::CreateVolume, None)?;
        if self.volumes.insert(name.to_string()) {
            self.record(format!("create_volume {}", name));
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let mut volumes: Vec<String> = self.volumes.iter().map(|v| v.key().clone()).collect();
        volumes.sort();
        Ok(volumes)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.check(RuntimeOp::RemoveVolume, None)?;
        if self.containers.iter().any(|c| c.mounts.contains_key(name)) {
            return Err(RuntimeError::VolumeInUse(name.to_string()).into());
        }
        if self.volumes.remove(name).is_some() {
            self.record(format!("remove_volume {}", name));
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        self.check(RuntimeOp::CreateNetwork, None)?;
        if self.networks.insert(name.to_string()) {
            self.record(format!("create_network {}", name));
        }
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<String>> {
        let mut networks: Vec<String> = self.networks.iter().map(|n| n.key().clone()).collect();
        networks.sort();
        Ok(networks)
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        if self.networks.remove(name).is_some() {
            self.record(format!("remove_network {}", name));
        }
        Ok(())
    }
}
