use reactor::{Entity, Identity, Schema};
use serde::{Deserialize, Serialize};

/// Kind of identity a permission is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Group,
    Service,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
            SubjectKind::Service => "service",
        }
    }

    /// The subject an identity acts as directly, if any.
    pub fn of(identity: Identity) -> Option<(SubjectKind, i64)> {
        match identity {
            Identity::User(id) => Some((SubjectKind::User, id)),
            Identity::Group(id) => Some((SubjectKind::Group, id)),
            Identity::Service(id) => Some((SubjectKind::Service, id)),
            Identity::System | Identity::Anonymous => None,
        }
    }
}

/// A named permission held by a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub subject_kind: SubjectKind,
    pub subject_id: i64,
    pub permission: String,
}

impl Entity for Permission {
    const TABLE: &'static str = "permissions";

    fn schema() -> Schema {
        Schema::new()
            .text("subject_kind")
            .integer("subject_id")
            .text("permission")
    }
}

/// Grants everything.
pub const ADMIN: &str = "admin";
/// Create, remove and operate any server.
pub const SERVERS_MANAGE: &str = "servers.manage";
/// Create, remove and operate services.
pub const SERVICES_MANAGE: &str = "services.manage";
