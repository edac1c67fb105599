//! Servers domain - game servers, their containers, power and images
//!
//! `UpgradeServer` is composite: it stops the server, changes its image and
//! starts it again through nested events, so a failure at any step rolls the
//! earlier steps back.

pub mod correctors;
pub mod events;
pub mod models;
pub mod reactors;

pub use correctors::FillPreviousImage;
pub use events::{ChangeServerImage, CreateServer, RemoveServer, ServerPower, UpgradeServer};
pub use models::{PowerState, Server};

use reactor::EngineBuilder;

use crate::domains::access::{guarded, RequiresPermission};
use crate::domains::permissions::SERVERS_MANAGE;
use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    let builder = builder
        .with_reactor::<CreateServer, _>(reactors::CreateServerReactor)
        .with_reactor::<RemoveServer, _>(reactors::RemoveServerReactor)
        .with_reactor::<ServerPower, _>(reactors::ServerPowerReactor)
        .with_reactor::<ChangeServerImage, _>(reactors::ChangeServerImageReactor)
        .with_corrector::<ChangeServerImage, _>(FillPreviousImage)
        .with_reactor::<UpgradeServer, _>(reactors::UpgradeServerReactor);
    let builder = guarded::<CreateServer>(builder)
        .with_veto::<CreateServer, _>(RequiresPermission(SERVERS_MANAGE));
    let builder = guarded::<RemoveServer>(builder);
    let builder = guarded::<ServerPower>(builder);
    let builder = guarded::<ChangeServerImage>(builder);
    guarded::<UpgradeServer>(builder)
}
