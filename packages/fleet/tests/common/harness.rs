//! Test harness running a fleet on in-memory storage and the simulated
//! container runtime.
//!
//! Every test gets a fresh engine, storage and runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fleet::kernel::SimulatedRuntime;
use fleet::{Config, Fleet};
use reactor::MemoryStorage;
use test_context::AsyncTestContext;

/// Test harness that manages a started fleet.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let admin = ctx.admin().await;
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    pub fleet: Fleet,
    /// The runtime behind the fleet, for fault injection and inspection.
    pub runtime: Arc<SimulatedRuntime>,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.fleet.engine().stop();
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let config = Config {
            settle_timeout: Duration::from_millis(200),
            ..Config::default()
        };
        let runtime = Arc::new(SimulatedRuntime::new());
        let fleet = Fleet::new(config, Arc::new(MemoryStorage::new()), runtime.clone())?;
        fleet.start().await?;
        Ok(Self { fleet, runtime })
    }
}
