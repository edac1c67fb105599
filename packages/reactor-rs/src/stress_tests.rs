//! Stress tests designed to break the reaction engine.
//!
//! These tests exercise races between concurrent reactions, the identity map
//! under concurrent hydration, and the event log under concurrent failures.

#[cfg(test)]
mod stress_tests {
    use crate::context::{Batch, Context, Identity};
    use crate::core::{CorrelationId, Direction, Event};
    use crate::engine::{Engine, ReactionContext};
    use crate::isolation::Isolation;
    use crate::memory::MemoryStorage;
    use crate::reactor::Reactor;
    use crate::schema::Schema;
    use crate::shadow::{Controller, Entity};
    use crate::storage::Storage;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // ==========================================================================
    // Test Types
    // ==========================================================================

    #[derive(Default)]
    struct Counters {
        balance: AtomicI64,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl Counters {
        fn enter(&self) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Clone, Serialize)]
    struct Deposit {
        amount: i64,
        direction: Direction,
    }

    impl Event for Deposit {
        const KIND: &'static str = "deposit";

        fn schema() -> Schema {
            Schema::new().integer("amount").text("direction")
        }

        fn direction(&self) -> Option<Direction> {
            Some(self.direction)
        }

        fn reversed(&self) -> Option<Self> {
            Some(Self {
                direction: self.direction.flip(),
                ..self.clone()
            })
        }
    }

    #[derive(Debug, Clone, Serialize)]
    struct Transfer {
        deposits: i64,
        fail: bool,
    }

    impl Event for Transfer {
        const KIND: &'static str = "transfer";

        fn schema() -> Schema {
            Schema::new().integer("deposits").boolean("fail")
        }
    }

    #[derive(Debug, Clone, Serialize)]
    struct Lookup {
        hold_ms: u64,
    }

    impl Event for Lookup {
        const KIND: &'static str = "lookup";

        fn schema() -> Schema {
            Schema::new().integer("hold_ms")
        }
    }

    struct DepositReactor;

    #[async_trait]
    impl Reactor<Deposit, Counters> for DepositReactor {
        async fn react(&self, event: &Deposit, ctx: &ReactionContext<Counters>) -> Result<()> {
            let delta = if event.direction.is_forward() {
                event.amount
            } else {
                -event.amount
            };
            ctx.deps().balance.fetch_add(delta, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    struct TransferReactor;

    #[async_trait]
    impl Reactor<Transfer, Counters> for TransferReactor {
        fn isolation(&self) -> Isolation {
            Isolation::Write
        }

        async fn react(&self, event: &Transfer, ctx: &ReactionContext<Counters>) -> Result<()> {
            ctx.deps().enter();
            let result = async {
                for _ in 0..event.deposits {
                    ctx.raise(Deposit {
                        amount: 10,
                        direction: Direction::Forward,
                    })
                    .await?;
                }
                if event.fail {
                    anyhow::bail!("transfer rejected");
                }
                Ok(())
            }
            .await;
            ctx.deps().leave();
            result
        }
    }

    struct LookupReactor;

    #[async_trait]
    impl Reactor<Lookup, Counters> for LookupReactor {
        fn isolation(&self) -> Isolation {
            Isolation::Read
        }

        async fn react(&self, event: &Lookup, ctx: &ReactionContext<Counters>) -> Result<()> {
            ctx.deps().enter();
            tokio::time::sleep(Duration::from_millis(event.hold_ms)).await;
            ctx.deps().leave();
            Ok(())
        }
    }

    async fn engine() -> Engine<Counters> {
        let engine = Engine::builder(Counters::default(), Arc::new(MemoryStorage::new()))
            .with_reactor::<Deposit, _>(DepositReactor)
            .with_reactor::<Transfer, _>(TransferReactor)
            .with_reactor::<Lookup, _>(LookupReactor)
            .build()
            .unwrap();
        engine.start().await.unwrap();
        engine
    }

    // ==========================================================================
    // Isolation
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_reactions_never_overlap() {
        let engine = engine().await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .raise(
                        &Context::system(),
                        Transfer {
                            deposits: 3,
                            fail: i % 3 == 0,
                        },
                    )
                    .await
            }));
        }

        let mut failed = 0;
        for handle in handles {
            if handle.await.unwrap().is_err() {
                failed += 1;
            }
        }

        assert_eq!(failed, 7);
        assert_eq!(engine.deps().max_running.load(Ordering::SeqCst), 1);
        // every failed transfer was fully compensated
        assert_eq!(engine.deps().balance.load(Ordering::SeqCst), 13 * 30);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_read_reactions_run_concurrently() {
        let engine = engine().await;
        let a = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.raise(&Context::system(), Lookup { hold_ms: 200 }).await })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.raise(&Context::system(), Lookup { hold_ms: 200 }).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(engine.deps().max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_blocks_concurrent_read() {
        let engine = engine().await;
        let writer = engine.isolation().acquire(Isolation::Write).await;

        let reader = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.raise(&Context::system(), Lookup { hold_ms: 0 }).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        drop(writer);
        tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader proceeds once the writer releases")
            .unwrap()
            .unwrap();
    }

    // ==========================================================================
    // Event Log
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_log_every_cancellation() {
        let engine = engine().await;
        let mut handles = Vec::new();
        for i in 0..12 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .raise(
                        &Context::system(),
                        Transfer {
                            deposits: 2,
                            fail: i % 2 == 0,
                        },
                    )
                    .await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let deposits = engine.store().history("deposit").await.unwrap();
        let cancellations = deposits.iter().filter(|d| d.cancels.is_some()).count();
        assert_eq!(deposits.len(), 12 * 2 + 6 * 2);
        assert_eq!(cancellations, 6 * 2);

        let transfers = engine.store().history("transfer").await.unwrap();
        assert_eq!(transfers.iter().filter(|t| !t.success).count(), 6);
        assert_eq!(engine.deps().balance.load(Ordering::SeqCst), 6 * 20);
    }

    // ==========================================================================
    // Identity Map
    // ==========================================================================

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Volume {
        name: String,
    }

    impl Entity for Volume {
        const TABLE: &'static str = "volumes";

        fn schema() -> Schema {
            Schema::new().text("name")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_returns_one_instance() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let volumes = Arc::new(Controller::<Volume>::new(storage));
        volumes.create_table().await.unwrap();

        let batch = Batch::new(CorrelationId::new(), Isolation::Write, true);
        let ctx = Context::new(Identity::System).with_batch(batch);
        let key = volumes
            .insert(&ctx, &Volume { name: "data".into() })
            .await
            .unwrap()
            .key();
        assert_eq!(volumes.evict_unused(), 1);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let volumes = volumes.clone();
            handles.push(tokio::spawn(async move { volumes.get(key).await.unwrap() }));
        }
        let mut shadows = Vec::new();
        for handle in handles {
            shadows.push(handle.await.unwrap());
        }
        assert!(shadows.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(volumes.cached_len(), 1);
    }
}
