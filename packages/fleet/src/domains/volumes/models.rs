use reactor::{Entity, Schema};
use serde::{Deserialize, Serialize};

/// A persistent data volume servers can mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    /// Name of the volume in the container runtime.
    pub runtime_name: String,
}

impl Entity for Volume {
    const TABLE: &'static str = "volumes";

    fn schema() -> Schema {
        Schema::new().text("name").text("runtime_name")
    }
}
