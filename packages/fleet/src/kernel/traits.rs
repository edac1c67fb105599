// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Naming convention: Base* for trait names (e.g., BaseContainerRuntime)

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::DuplexStream;

// =============================================================================
// Container Runtime Trait (Infrastructure - container engine driver)
// =============================================================================

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// Volume name to mount path.
    pub mounts: BTreeMap<String, String>,
    pub network: Option<String>,
}

/// Lifecycle state reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Exited,
}

impl ContainerState {
    pub fn is_running(self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Paused)
    }
}

/// Result of inspecting a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub labels: BTreeMap<String, String>,
}

/// Console streams of an attached container.
#[derive(Debug)]
pub struct Attachment {
    pub stdin: DuplexStream,
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
}

/// Container engine driver.
///
/// Every operation must be safe to retry, and container ids are stable for
/// the lifetime of the container.
#[async_trait]
pub trait BaseContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn pause(&self, id: &str) -> Result<()>;

    async fn resume(&self, id: &str) -> Result<()>;

    async fn kill(&self, id: &str) -> Result<()>;

    /// Remove a container, stopping it first if needed.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// `None` if the runtime does not (or not yet) know the container.
    async fn inspect(&self, id: &str) -> Result<Option<ContainerInfo>>;

    async fn attach(&self, id: &str) -> Result<Attachment>;

    /// Containers carrying every given label.
    async fn list_by_label(&self, labels: &BTreeMap<String, String>) -> Result<Vec<ContainerInfo>>;

    async fn create_volume(&self, name: &str) -> Result<()>;

    async fn list_volumes(&self) -> Result<Vec<String>>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn create_network(&self, name: &str) -> Result<()>;

    async fn list_networks(&self) -> Result<Vec<String>>;

    async fn remove_network(&self, name: &str) -> Result<()>;
}
