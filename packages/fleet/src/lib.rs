// Fleet - game-server fleet management on the reactor engine
//
// Every state change of the fleet is an event raised through the engine.
// Domains own their entities, events, reactors and access rules; the
// container engine sits behind the kernel's runtime trait.

pub mod common;
pub mod config;
pub mod domains;
pub mod fleet;
pub mod kernel;
pub mod telemetry;

pub use config::*;
pub use crate::fleet::Fleet;
