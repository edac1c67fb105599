use reactor::{Direction, Event, Schema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateService {
    pub name: String,
    pub image: String,
}

impl Event for CreateService {
    const KIND: &'static str = "create_service";

    fn schema() -> Schema {
        Schema::new().text("name").text("image")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveService {
    pub service_id: i64,
}

impl Event for RemoveService {
    const KIND: &'static str = "remove_service";

    fn schema() -> Schema {
        Schema::new().integer("service_id")
    }
}

/// Start (forward) or stop (backward) a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePower {
    pub service_id: i64,
    pub direction: Direction,
}

impl ServicePower {
    pub fn start(service_id: i64) -> Self {
        Self {
            service_id,
            direction: Direction::Forward,
        }
    }

    pub fn stop(service_id: i64) -> Self {
        Self {
            service_id,
            direction: Direction::Backward,
        }
    }
}

impl Event for ServicePower {
    const KIND: &'static str = "service_power";

    fn schema() -> Schema {
        Schema::new().integer("service_id").text("direction")
    }

    fn direction(&self) -> Option<Direction> {
        Some(self.direction)
    }

    fn reversed(&self) -> Option<Self> {
        Some(Self {
            direction: self.direction.flip(),
            ..self.clone()
        })
    }
}
