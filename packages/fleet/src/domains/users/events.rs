use reactor::{ColumnType, Event, Interface, Schema};
use serde::{Deserialize, Serialize};

use crate::common::USER_EVENT;

static USER_INTERFACES: [&Interface; 1] = [&USER_EVENT];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub password_hash: Option<String>,
    pub admin: bool,
}

impl Event for CreateUser {
    const KIND: &'static str = "create_user";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .optional("password_hash", ColumnType::Text)
            .boolean("admin")
    }
}

/// Remove a user, revoking their memberships and permissions first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveUser {
    pub user_id: i64,
}

impl Event for RemoveUser {
    const KIND: &'static str = "remove_user";

    fn schema() -> Schema {
        Schema::new().integer("user_id")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &USER_INTERFACES
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePassword {
    pub user_id: i64,
    pub password_hash: String,
}

impl Event for ChangePassword {
    const KIND: &'static str = "change_password";

    fn schema() -> Schema {
        Schema::new().integer("user_id").text("password_hash")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &USER_INTERFACES
    }
}
