//! Users domain - accounts, passwords and account removal

pub mod events;
pub mod models;
pub mod reactors;

pub use events::{ChangePassword, CreateUser, RemoveUser};
pub use models::User;

use reactor::EngineBuilder;

use crate::domains::access::guarded;
use crate::kernel::FleetDeps;

pub fn register(builder: EngineBuilder<FleetDeps>) -> EngineBuilder<FleetDeps> {
    let builder = builder
        .with_reactor::<CreateUser, _>(reactors::CreateUserReactor)
        .with_reactor::<RemoveUser, _>(reactors::RemoveUserReactor)
        .with_reactor::<ChangePassword, _>(reactors::ChangePasswordReactor);
    let builder = guarded::<CreateUser>(builder);
    let builder = guarded::<RemoveUser>(builder);
    guarded::<ChangePassword>(builder)
}
