use reactor::{ColumnType, Direction, Event, Schema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroup {
    pub name: String,
    pub owner_id: Option<i64>,
}

impl Event for CreateGroup {
    const KIND: &'static str = "create_group";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .optional("owner_id", ColumnType::Integer)
    }
}

/// Remove a group, revoking every membership and permission first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveGroup {
    pub group_id: i64,
}

impl Event for RemoveGroup {
    const KIND: &'static str = "remove_group";

    fn schema() -> Schema {
        Schema::new().integer("group_id")
    }
}

/// Add (forward) or remove (backward) a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: i64,
    pub user_id: i64,
    pub direction: Direction,
}

impl GroupMembership {
    pub fn join(group_id: i64, user_id: i64) -> Self {
        Self {
            group_id,
            user_id,
            direction: Direction::Forward,
        }
    }

    pub fn leave(group_id: i64, user_id: i64) -> Self {
        Self {
            group_id,
            user_id,
            direction: Direction::Backward,
        }
    }
}

impl Event for GroupMembership {
    const KIND: &'static str = "group_membership";

    fn schema() -> Schema {
        Schema::new()
            .integer("group_id")
            .integer("user_id")
            .text("direction")
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
