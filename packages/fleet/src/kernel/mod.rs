pub mod deps;
pub mod simulated;
pub mod traits;

pub use deps::FleetDeps;
pub use simulated::{RuntimeError, RuntimeOp, SimulatedRuntime};
pub use traits::{Attachment, BaseContainerRuntime, ContainerInfo, ContainerSpec, ContainerState};
