use reactor::{ColumnType, Entity, Schema};
use serde::{Deserialize, Serialize};

use crate::domains::servers::PowerState;

/// An auxiliary container (proxy, database, map renderer) serving the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
    pub container_id: Option<String>,
    pub state: PowerState,
}

impl Entity for Service {
    const TABLE: &'static str = "services";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .text("image")
            .optional("container_id", ColumnType::Text)
            .text("state")
    }
}
