use reactor::{ColumnType, Entity, Schema};
use serde::{Deserialize, Serialize};

use crate::kernel::ContainerState;

/// Power state of a managed container, as last recorded by the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Stopped,
    Running,
    /// The runtime no longer knows the container.
    Missing,
}

impl PowerState {
    pub fn is_running(self) -> bool {
        matches!(self, PowerState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::Stopped => "stopped",
            PowerState::Running => "running",
            PowerState::Missing => "missing",
        }
    }
}

impl From<Option<ContainerState>> for PowerState {
    fn from(state: Option<ContainerState>) -> Self {
        match state {
            Some(state) if state.is_running() => PowerState::Running,
            Some(_) => PowerState::Stopped,
            None => PowerState::Missing,
        }
    }
}

/// A game server: one container running a server image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub image: String,
    pub volume_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub container_id: Option<String>,
    pub state: PowerState,
}

impl Entity for Server {
    const TABLE: &'static str = "servers";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .text("image")
            .optional("volume_id", ColumnType::Integer)
            .optional("owner_id", ColumnType::Integer)
            .optional("container_id", ColumnType::Text)
            .text("state")
    }
}
