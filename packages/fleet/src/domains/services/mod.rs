//! Services domain - auxiliary containers serving the fleet

pub mod events;
pub mod models;
pub mod reactors;

pub use events::{CreateService, RemoveService, ServicePower};
pub use models::Service;

use reactor::EngineBuilder;

use crate::domains::access::{guarded, RequiresPermission};
use crate::domains::permissions::SERVICES_MANAGE;
use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    let builder = builder
        .with_reactor::<CreateService, _>(reactors::CreateServiceReactor)
        .with_reactor::<RemoveService, _>(reactors::RemoveServiceReactor)
        .with_reactor::<ServicePower, _>(reactors::ServicePowerReactor);
    let builder = guarded::<CreateService>(builder)
        .with_veto::<CreateService, _>(RequiresPermission(SERVICES_MANAGE));
    let builder = guarded::<RemoveService>(builder)
        .with_veto::<RemoveService, _>(RequiresPermission(SERVICES_MANAGE));
    guarded::<ServicePower>(builder).with_veto::<ServicePower, _>(RequiresPermission(SERVICES_MANAGE))
}
