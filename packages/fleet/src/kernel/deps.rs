//! Fleet dependencies for reactors, correctors and vetoes
//!
//! This module provides the central dependency container handed to the
//! reaction engine. The container runtime is a trait object so tests can
//! swap in the simulated runtime.

use std::sync::Arc;

use anyhow::Result;
use reactor::{Controller, Entity, Storage};

use crate::config::Config;
use crate::domains::groups::{Group, Membership};
use crate::domains::permissions::Permission;
use crate::domains::servers::Server;
use crate::domains::services::Service;
use crate::domains::users::User;
use crate::domains::volumes::Volume;
use crate::kernel::BaseContainerRuntime;

// =============================================================================
// FleetDeps
// =============================================================================

/// Fleet dependencies accessible to reactors (using traits for testability)
pub struct FleetDeps {
    pub config: Config,
    pub runtime: Arc<dyn BaseContainerRuntime>,
    pub users: Controller<User>,
    pub groups: Controller<Group>,
    pub members: Controller<Membership>,
    pub permissions: Controller<Permission>,
    pub volumes: Controller<Volume>,
    pub servers: Controller<Server>,
    pub services: Controller<Service>,
}

impl FleetDeps {
    pub fn new(config: Config, storage: Arc<dyn Storage>, runtime: Arc<dyn BaseContainerRuntime>) -> Self {
        let capacity = config.shadow_cache_capacity;
        Self {
            users: controller(&storage, capacity),
            groups: controller(&storage, capacity),
            members: controller(&storage, capacity),
            permissions: controller(&storage, capacity),
            volumes: controller(&storage, capacity),
            servers: controller(&storage, capacity),
            services: controller(&storage, capacity),
            config,
            runtime,
        }
    }

    /// Create every entity table. Idempotent.
    pub async fn create_tables(&self) -> Result<()> {
        self.users.create_table().await?;
        self.groups.create_table().await?;
        self.members.create_table().await?;
        self.permissions.create_table().await?;
        self.volumes.create_table().await?;
        self.servers.create_table().await?;
        self.services.create_table().await?;
        Ok(())
    }
}

fn controller<T: Entity>(storage: &Arc<dyn Storage>, capacity: usize) -> Controller<T> {
    Controller::with_capacity(storage.clone(), capacity)
}
