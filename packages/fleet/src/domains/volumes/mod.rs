//! Volumes domain - persistent data volumes mounted by servers

pub mod events;
pub mod models;
pub mod reactors;

pub use events::{CreateVolume, RemoveVolume};
pub use models::Volume;

use reactor::EngineBuilder;

use crate::domains::access::{guarded, RequiresPermission};
use crate::domains::permissions::SERVERS_MANAGE;
use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    let builder = builder
        .with_reactor::<CreateVolume, _>(reactors::CreateVolumeReactor)
        .with_reactor::<RemoveVolume, _>(reactors::RemoveVolumeReactor);
    let builder = guarded::<CreateVolume>(builder)
        .with_veto::<CreateVolume, _>(RequiresPermission(SERVERS_MANAGE));
    guarded::<RemoveVolume>(builder).with_veto::<RemoveVolume, _>(RequiresPermission(SERVERS_MANAGE))
}
