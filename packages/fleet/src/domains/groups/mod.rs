//! Groups domain - named sets of users sharing permissions

pub mod events;
pub mod models;
pub mod reactors;
pub mod vetoes;

pub use events::{CreateGroup, GroupMembership, RemoveGroup};
pub use models::{Group, Membership};
pub use vetoes::GroupOwner;

use reactor::EngineBuilder;

use crate::domains::access::guarded;
use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    let builder = builder
        .with_reactor::<CreateGroup, _>(reactors::CreateGroupReactor)
        .with_reactor::<RemoveGroup, _>(reactors::RemoveGroupReactor)
        .with_reactor::<GroupMembership, _>(reactors::GroupMembershipReactor);
    let builder = guarded::<CreateGroup>(builder);
    let builder = guarded::<RemoveGroup>(builder).with_veto::<RemoveGroup, _>(GroupOwner);
    guarded::<GroupMembership>(builder).with_veto::<GroupMembership, _>(GroupOwner)
}
