use reactor::{Event, Schema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolume {
    pub name: String,
}

impl Event for CreateVolume {
    const KIND: &'static str = "create_volume";

    fn schema() -> Schema {
        Schema::new().text("name")
    }
}

/// Remove an unused volume and its runtime storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveVolume {
    pub volume_id: i64,
}

impl Event for RemoveVolume {
    const KIND: &'static str = "remove_volume";

    fn schema() -> Schema {
        Schema::new().integer("volume_id")
    }
}
