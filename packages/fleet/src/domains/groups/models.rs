use reactor::{ColumnType, Entity, Schema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub owner_id: Option<i64>,
}

impl Entity for Group {
    const TABLE: &'static str = "groups";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .optional("owner_id", ColumnType::Integer)
    }
}

/// One row of the many-to-many group membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: i64,
    pub user_id: i64,
}

impl Entity for Membership {
    const TABLE: &'static str = "group_members";

    fn schema() -> Schema {
        Schema::new().integer("group_id").integer("user_id")
    }
}
