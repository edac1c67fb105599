//! Test fixtures for creating fleet data as the system identity.

use std::sync::Arc;

use fleet::domains::servers::Server;
use reactor::{Context, Identity, Shadow};

use super::TestHarness;

impl TestHarness {
    /// Create a regular user and return their id.
    pub async fn user(&self, name: &str) -> i64 {
        self.fleet
            .create_user(&Context::system(), name, None, false)
            .await
            .expect("Failed to create user")
            .key()
    }

    /// Create an administrator and return their id.
    pub async fn admin(&self, name: &str) -> i64 {
        self.fleet
            .create_user(&Context::system(), name, None, true)
            .await
            .expect("Failed to create admin")
            .key()
    }

    /// Create a stopped server with no volume.
    pub async fn server(&self, name: &str, image: &str, owner_id: Option<i64>) -> Arc<Shadow<Server>> {
        self.fleet
            .create_server(&Context::system(), name, image, owner_id, None)
            .await
            .expect("Failed to create server")
    }

    /// Create a server and start it.
    pub async fn running_server(&self, name: &str, image: &str, owner_id: Option<i64>) -> Arc<Shadow<Server>> {
        let server = self.server(name, image, owner_id).await;
        assert!(self
            .fleet
            .start_server(&Context::system(), server.key())
            .await
            .expect("Failed to start server"));
        server
    }

    pub async fn group_id(&self, name: &str) -> i64 {
        self.fleet
            .group_by_name(name)
            .await
            .expect("Failed to look up group")
            .expect("group exists")
            .key()
    }
}

pub fn as_user(user_id: i64) -> Context {
    Context::new(Identity::User(user_id))
}
