//! Permissions domain - named permissions granted to users, groups and services

pub mod events;
pub mod models;
pub mod queries;
pub mod reactors;

pub use events::PermissionGrant;
pub use models::{Permission, SubjectKind, ADMIN, SERVERS_MANAGE, SERVICES_MANAGE};
pub use queries::{granted, has_permission, is_admin};

use reactor::EngineBuilder;

use crate::domains::access::guarded;
use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    guarded::<PermissionGrant>(builder.with_reactor::<PermissionGrant, _>(reactors::PermissionGrantReactor))
}
