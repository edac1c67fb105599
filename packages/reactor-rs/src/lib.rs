//! # Reactor
//!
//! An event-sourced reaction engine: every state change is an [`Event`]
//! raised through the [`Engine`], reacted to by at most one [`Reactor`],
//! persisted with the events its reaction raised, and broadcast once it has
//! settled.
//!
//! ## Core Concepts
//!
//! - [`Event`] = an immutable, serializable fact with a stable kind name
//! - [`Reactor`] = applies an event's side effects; may raise nested events
//! - [`Veto`] / [`InterfaceVeto`] = decide whether an identity may raise an event
//! - [`Corrector`] = rewrites an event before vetoes and reactors see it
//! - [`Shadow`] / [`Controller`] = identity-mapped cache of persisted entities
//!
//! ## Raising an Event
//!
//! ```text
//! engine.raise(ctx, event)
//!     │
//!     ▼ acquire isolation (Read shared, Write exclusive)
//! Corrector.correct()
//!     │
//!     ▼ non-System identities only
//! Veto.impose() ── Deny ──► AccessDenied
//!     │
//!     ▼
//! Reactor.react() ──► ctx.raise(nested) ──► correct, react, queue
//!     │
//!     ├─ Ok  ──► persist batch, broadcast
//!     │
//!     └─ Err ──► cancel applied reversible events, newest first
//!                persist batch + cancellations, broadcast, return error
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Nested events come first** - a batch lists events in completion order,
//!    so the top-level event is last
//! 2. **Failed batches compensate** - every applied, reversible event of a
//!    failed batch gets a cancellation, and every cancellation is attempted
//! 3. **Writers are exclusive** - a `Write` reaction never overlaps another
//!    reaction
//! 4. **One shadow per row** - a controller hands out the same [`Shadow`] for
//!    a key while any caller holds it
//!
//! ## Example
//!
//! ```ignore
//! use reactor::{async_trait, Context, Engine, Event, MemoryStorage, ReactionContext, Reactor, Schema};
//!
//! #[derive(Debug, Clone, Serialize)]
//! struct CreateGroup { name: String }
//!
//! impl Event for CreateGroup {
//!     const KIND: &'static str = "create_group";
//!     fn schema() -> Schema { Schema::new().text("name") }
//! }
//!
//! struct CreateGroupReactor;
//!
//! #[async_trait]
//! impl Reactor<CreateGroup, Deps> for CreateGroupReactor {
//!     async fn react(&self, event: &CreateGroup, ctx: &ReactionContext<Deps>) -> anyhow::Result<()> {
//!         ctx.deps().groups.insert(ctx.context(), &Group::new(&event.name)).await?;
//!         Ok(())
//!     }
//! }
//!
//! let engine = Engine::builder(deps, Arc::new(MemoryStorage::new()))
//!     .with_reactor::<CreateGroup, _>(CreateGroupReactor)
//!     .build()?;
//! engine.start().await?;
//! engine.raise(&Context::system(), CreateGroup { name: "admins".into() }).await?;
//! ```

// Core modules
mod bus;
mod context;
mod core;
mod corrector;
mod engine;
mod error;
mod isolation;
mod memory;
mod reactor;
mod registry;
mod schema;
mod shadow;
mod storage;
mod store;
mod veto;

// PostgreSQL storage (feature-gated)
#[cfg(feature = "postgres")]
mod pg;

// Testing utilities (feature-gated)
#[cfg(feature = "testing")]
pub mod testing;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export core types
pub use crate::core::{
    interface_closure, AnyEvent, CorrelationId, Direction, Event, EventEnvelope, Interface,
};

// Re-export schema types
pub use schema::{ColumnType, Field, Row, Schema, TableSchema};

// Re-export error types
pub use crate::error::{CompensationFailed, FailedCancellation, ReactorError, SafeErrorCategory};

// Re-export context types
pub use context::{Batch, Context, Identity};

// Re-export isolation types
pub use isolation::{Isolation, IsolationController, IsolationGuard};

// Re-export storage types
pub use memory::MemoryStorage;
pub use storage::{retry_serializable, Filter, KeyedRow, Storage, Transaction, MAX_TRANSACTION_ATTEMPTS};
pub use store::{interface_table, kind_table, EventStore, StoredEvent, EVENTS_TABLE};

#[cfg(feature = "postgres")]
pub use pg::PgStorage;

// Re-export handler types
pub use corrector::Corrector;
pub use reactor::{reactor_fn, FnReactor, Reactor};
pub use veto::{compose, InterfaceVeto, Verdict, Veto};

// Re-export registry types
pub use registry::{EventDescriptor, EventInfo};

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, Phase, ReactionContext};

// Re-export bus types
pub use bus::{EventBus, DEFAULT_CAPACITY};

// Re-export shadow types
pub use shadow::{Controller, Entity, Shadow, DEFAULT_CACHE_CAPACITY};

// Re-export commonly used external types
pub use async_trait::async_trait;
