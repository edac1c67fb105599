//! Semantic interfaces shared by fleet events.
//!
//! Each interface has its own event table, so the history of a subject, a
//! user or a server can be queried across event kinds, and interface vetoes
//! can cover every kind carrying it.

use reactor::{Interface, Schema};

fn subject_schema() -> Schema {
    Schema::new().text("subject_kind").integer("subject_id")
}

fn user_event_schema() -> Schema {
    Schema::new().integer("user_id")
}

fn server_event_schema() -> Schema {
    Schema::new().integer("server_id")
}

/// Events about a permission subject (a user, group or service).
pub static SUBJECT: Interface = Interface {
    name: "subject",
    schema: subject_schema,
    parents: &[],
};

/// Events about one user's own account.
pub static USER_EVENT: Interface = Interface {
    name: "user_event",
    schema: user_event_schema,
    parents: &[],
};

/// Events about an existing server.
pub static SERVER_EVENT: Interface = Interface {
    name: "server_event",
    schema: server_event_schema,
    parents: &[],
};

/// Operating a server (power, upgrade); its owner may do this.
pub static SERVER_CONTROL: Interface = Interface {
    name: "server_control",
    schema: server_event_schema,
    parents: &[&SERVER_EVENT],
};
