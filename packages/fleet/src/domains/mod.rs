//! Fleet domains
//!
//! Each domain owns its entities, events and reactors and registers them on
//! the engine builder. Access rules shared across domains live in `access`.

pub mod access;
pub mod groups;
pub mod permissions;
pub mod servers;
pub mod services;
pub mod sync;
pub mod users;
pub mod volumes;

use reactor::EngineBuilder;

use crate::kernel::FleetDeps;

/// Register every fleet event, reactor, corrector and veto.
pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    let builder = access::register(builder);
    let builder = users::register(builder);
    let builder = groups::register(builder);
    let builder = permissions::register(builder);
    let builder = volumes::register(builder);
    let builder = servers::register(builder);
    let builder = services::register(builder);
    sync::register(builder)
}
