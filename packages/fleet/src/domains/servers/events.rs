use reactor::{ColumnType, Direction, Event, Interface, Schema};
use serde::{Deserialize, Serialize};

use crate::common::{SERVER_CONTROL, SERVER_EVENT};

static SERVER_EVENT_INTERFACES: [&Interface; 1] = [&SERVER_EVENT];
static SERVER_CONTROL_INTERFACES: [&Interface; 1] = [&SERVER_CONTROL];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateServer {
    pub name: String,
    pub image: String,
    pub owner_id: Option<i64>,
    pub volume_id: Option<i64>,
}

impl Event for CreateServer {
    const KIND: &'static str = "create_server";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .text("image")
            .optional("owner_id", ColumnType::Integer)
            .optional("volume_id", ColumnType::Integer)
    }
}

/// Stop a server if needed, remove its container and forget it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveServer {
    pub server_id: i64,
}

impl Event for RemoveServer {
    const KIND: &'static str = "remove_server";

    fn schema() -> Schema {
        Schema::new().integer("server_id")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &SERVER_EVENT_INTERFACES
    }
}

/// Start (forward) or stop (backward) a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPower {
    pub server_id: i64,
    pub direction: Direction,
}

impl ServerPower {
    pub fn start(server_id: i64) -> Self {
        Self {
            server_id,
            direction: Direction::Forward,
        }
    }

    pub fn stop(server_id: i64) -> Self {
        Self {
            server_id,
            direction: Direction::Backward,
        }
    }
}

impl Event for ServerPower {
    const KIND: &'static str = "server_power";

    fn schema() -> Schema {
        Schema::new().integer("server_id").text("direction")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &SERVER_CONTROL_INTERFACES
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

/// Replace a server's container with one running `image`.
///
/// `was` is the image before the change; it is filled in on raise and is what
/// the cancellation switches back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeServerImage {
    pub server_id: i64,
    pub image: String,
    pub was: Option<String>,
    pub direction: Direction,
}

impl ChangeServerImage {
    pub fn new(server_id: i64, image: impl Into<String>) -> Self {
        Self {
            server_id,
            image: image.into(),
            was: None,
            direction: Direction::Forward,
        }
    }

    /// Image the server ends up running.
    pub fn target(&self) -> Option<&str> {
        if self.direction.is_forward() {
            Some(&self.image)
        } else {
            self.was.as_deref()
        }
    }
}

impl Event for ChangeServerImage {
    const KIND: &'static str = "change_server_image";

    fn schema() -> Schema {
        Schema::new()
            .integer("server_id")
            .text("image")
            .optional("was", ColumnType::Text)
            .text("direction")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &SERVER_EVENT_INTERFACES
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

/// Stop, change image, and bring the server back to its previous power state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeServer {
    pub server_id: i64,
    pub image: String,
}

impl Event for UpgradeServer {
    const KIND: &'static str = "upgrade_server";

    fn schema() -> Schema {
        Schema::new().integer("server_id").text("image")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &SERVER_CONTROL_INTERFACES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_change_targets_previous_image_when_cancelled() {
        let change = ChangeServerImage {
            was: Some("paper:1.20".into()),
            ..ChangeServerImage::new(1, "paper:1.21")
        };
        assert_eq!(change.target(), Some("paper:1.21"));

        let cancellation = change.reversed().unwrap();
        assert_eq!(cancellation.target(), Some("paper:1.20"));
        assert_eq!(cancellation.reversed().unwrap(), change);
    }
}
