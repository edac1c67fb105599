use reactor::{ColumnType, Event, Schema};
use serde::{Deserialize, Serialize};

use crate::domains::servers::PowerState;

/// A managed container as the runtime reported it during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerObserved {
    pub container_id: String,
    pub name: String,
    /// Value of the `kind` label, if present.
    pub kind: Option<String>,
    pub state: PowerState,
}

impl Event for ContainerObserved {
    const KIND: &'static str = "container_observed";

    fn schema() -> Schema {
        Schema::new()
            .text("container_id")
            .text("name")
            .optional("kind", ColumnType::Text)
            .text("state")
    }
}
