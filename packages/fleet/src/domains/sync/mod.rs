//! Sync domain - sweeps runtime state into the fleet's records

pub mod actions;
pub mod events;

pub use actions::synchronize;
pub use events::ContainerObserved;

use reactor::EngineBuilder;

use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    builder.register::<ContainerObserved>()
}
