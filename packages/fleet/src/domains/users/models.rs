use reactor::{ColumnType, Entity, Schema};
use serde::{Deserialize, Serialize};

/// A person who can log in and own servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Hash produced by the login layer; never the password itself.
    pub password_hash: Option<String>,
    pub admin: bool,
}

impl Entity for User {
    const TABLE: &'static str = "users";

    fn schema() -> Schema {
        Schema::new()
            .text("name")
            .optional("password_hash", ColumnType::Text)
            .boolean("admin")
    }
}
