use reactor::{Direction, Event, Interface, Schema};
use serde::{Deserialize, Serialize};

use crate::common::SUBJECT;
use crate::domains::permissions::SubjectKind;

static PERMISSION_INTERFACES: [&Interface; 1] = [&SUBJECT];

/// Grant (forward) or revoke (backward) a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub subject_kind: SubjectKind,
    pub subject_id: i64,
    pub permission: String,
    pub direction: Direction,
}

impl PermissionGrant {
    pub fn grant(subject_kind: SubjectKind, subject_id: i64, permission: impl Into<String>) -> Self {
        Self {
            subject_kind,
            subject_id,
            permission: permission.into(),
            direction: Direction::Forward,
        }
    }

    pub fn revoke(subject_kind: SubjectKind, subject_id: i64, permission: impl Into<String>) -> Self {
        Self {
            direction: Direction::Backward,
            ..Self::grant(subject_kind, subject_id, permission)
        }
    }
}

impl Event for PermissionGrant {
    const KIND: &'static str = "permission_grant";

    fn schema() -> Schema {
        Schema::new()
            .text("subject_kind")
            .integer("subject_id")
            .text("permission")
            .text("direction")
    }

    fn interfaces() -> &'static [&'static Interface] {
        &PERMISSION_INTERFACES
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
