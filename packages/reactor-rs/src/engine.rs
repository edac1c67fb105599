//! Reactor engine: raise, correct, veto, react, persist, broadcast.
//!
//! The engine is the single path through which state changes:
//!
//! ```text
//! raise(E) → acquire isolation → correct → veto → react ─┬→ persist batch → broadcast
//!                  ↑                            │          │
//!                  │       nested raises ───────┘          └→ compensate (reverse order)
//!                  │       join the batch                       → persist → broadcast
//!                  └─────────── released when the batch settles ──────────────┘
//! ```
//!
//! # Batches
//!
//! A top-level `raise` (or [`Engine::reaction`]) opens a batch. Every event
//! raised while its reactor runs is reacted to immediately and queued in the
//! batch, marked successful or failed. When the reactor returns, the batch
//! settles:
//!
//! - **Success**: nested events and then the top-level event are persisted in
//!   one transaction and broadcast in that order.
//! - **Failure**: queued events that are reversible and were applied are
//!   compensated in reverse order. Each compensation runs the event's reactor
//!   on its cancellation, inside a batch that is never itself compensated. A
//!   failing compensation is logged and recorded, and the cascade continues.
//!   Everything touched is persisted and broadcast, the top-level event last
//!   with `success = false`, and the original error is returned.
//!
//! Settling runs on a spawned task, so a caller dropping the `raise` future
//! cannot interrupt persistence or a compensation cascade half way.
//!
//! # Isolation
//!
//! Top-level reactions hold the [`IsolationController`] lock for their whole
//! duration: shared for `Read`, exclusive for `Write`. Nested raises never
//! touch the lock.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::context::{Batch, Context, Identity};
use crate::core::{AnyEvent, CorrelationId, Event, EventEnvelope};
use crate::corrector::{Corrector, CorrectorWrapper};
use crate::error::{CompensationFailed, FailedCancellation, ReactorError};
use crate::isolation::{Isolation, IsolationController, IsolationGuard};
use crate::reactor::{Reactor, ReactorWrapper};
use crate::registry::{EventInfo, EventRegistry};
use crate::storage::Storage;
use crate::store::EventStore;
use crate::veto::{InterfaceVeto, Verdict, Veto, VetoWrapper};

/// Lifecycle phase of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Built, event tables not created yet.
    Init = 0,
    Running = 1,
    Stopped = 2,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Init,
            1 => Phase::Running,
            _ => Phase::Stopped,
        }
    }
}

struct EngineInner<D> {
    deps: Arc<D>,
    registry: EventRegistry<D>,
    store: EventStore,
    bus: EventBus,
    isolation: IsolationController,
    phase: AtomicU8,
}

/// The reaction engine. Cheap to clone; clones share all state.
pub struct Engine<D> {
    inner: Arc<EngineInner<D>>,
}

impl<D> Clone for Engine<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Handle given to reactors and reaction blocks.
///
/// Raising through it joins the running batch.
pub struct ReactionContext<D> {
    engine: Engine<D>,
    ctx: Context,
}

impl<D> Clone for ReactionContext<D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<D: Send + Sync + 'static> ReactionContext<D> {
    pub fn deps(&self) -> &D {
        &self.engine.inner.deps
    }

    /// Context carrying the running batch; pass it to entity mutators.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn identity(&self) -> Identity {
        self.ctx.identity()
    }

    pub fn engine(&self) -> &Engine<D> {
        &self.engine
    }

    /// Raise a nested event into the running batch.
    pub async fn raise<E: Event>(&self, event: E) -> Result<()> {
        self.engine.raise(&self.ctx, event).await
    }
}

impl<D> std::fmt::Debug for ReactionContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionContext")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Outcome of settling a batch.
#[derive(Default)]
struct Settlement {
    failures: Vec<FailedCancellation>,
    storage: Option<anyhow::Error>,
}

impl<D: Send + Sync + 'static> Engine<D> {
    /// Create a new engine builder.
    pub fn builder(deps: D, storage: Arc<dyn Storage>) -> EngineBuilder<D> {
        EngineBuilder::new(deps, storage)
    }

    pub fn deps(&self) -> &D {
        &self.inner.deps
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Subscribe to committed events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.inner.bus.subscribe()
    }

    pub fn store(&self) -> &EventStore {
        &self.inner.store
    }

    pub fn isolation(&self) -> &IsolationController {
        &self.inner.isolation
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    /// Create the event tables and start accepting raises.
    pub async fn start(&self) -> Result<()> {
        match self.phase() {
            Phase::Init => {}
            Phase::Running => return Ok(()),
            Phase::Stopped => {
                return Err(ReactorError::WrongPhase {
                    operation: "start",
                    required: "an engine that was never stopped",
                }
                .into())
            }
        }
        self.inner.store.create_schema().await?;
        self.inner
            .phase
            .store(Phase::Running as u8, Ordering::Release);
        info!(kinds = self.inner.registry.len(), "reactor engine started");
        Ok(())
    }

    /// Stop accepting raises. Reactions already running complete normally.
    pub fn stop(&self) {
        self.inner
            .phase
            .store(Phase::Stopped as u8, Ordering::Release);
        info!("reactor engine stopped");
    }

    /// Static metadata of a registered event type.
    pub fn describe<E: Event>(&self) -> Result<&EventInfo<D>, ReactorError> {
        self.inner.registry.describe::<E>()
    }

    /// Compose every veto that applies to `event`.
    ///
    /// The event's own vetoes run first, in registration order, then the
    /// vetoes of each implemented interface. A `Deny` stops evaluation.
    pub async fn verdict<E: Event>(&self, ctx: &Context, event: &E) -> Result<Verdict> {
        let info = self.inner.registry.describe::<E>()?;
        let deps = &*self.inner.deps;
        let mut verdict = Verdict::Unknown;

        for veto in &info.vetoes {
            verdict = verdict.and(veto.impose_any(event, deps, ctx).await?);
            if verdict == Verdict::Deny {
                return Ok(verdict);
            }
        }

        let vetoed_interfaces: Vec<_> = info
            .interfaces()
            .iter()
            .filter(|iface| !self.inner.registry.interface_vetoes(iface.name).is_empty())
            .collect();
        if vetoed_interfaces.is_empty() {
            return Ok(verdict);
        }

        let fields = AnyEvent::to_row(event)?;
        for iface in vetoed_interfaces {
            let row = (iface.schema)().project(&fields);
            for veto in self.inner.registry.interface_vetoes(iface.name) {
                verdict = verdict.and(veto.impose(&row, deps, ctx).await?);
                if verdict == Verdict::Deny {
                    return Ok(verdict);
                }
            }
        }
        Ok(verdict)
    }

    /// True if the composed verdict is `Allow`. The system identity is
    /// always allowed.
    pub async fn is_allowed<E: Event>(&self, ctx: &Context, event: &E) -> Result<bool> {
        if ctx.identity().is_system() {
            return Ok(true);
        }
        Ok(self.verdict(ctx, event).await?.is_allowed())
    }

    /// Raise an event.
    ///
    /// Inside a running reaction (the context carries an active batch) the
    /// event is corrected, reacted to and queued in that batch. Otherwise it
    /// starts a new top-level batch.
    pub async fn raise<E: Event>(&self, ctx: &Context, event: E) -> Result<()> {
        self.ensure_running("raise")?;
        let info = self.inner.registry.describe::<E>()?;

        match ctx.batch() {
            Some(batch) if batch.is_active() => {
                let batch = batch.clone();
                self.raise_nested(ctx, &batch, info, event).await
            }
            _ => self.raise_top(ctx, info, event).await,
        }
    }

    /// Run an ad-hoc block as one isolated, compensated batch.
    ///
    /// Events raised through the block's context are queued like the nested
    /// events of a reactor. `Unknown` isolation is treated as `Write`. Inside
    /// a running reaction the block simply joins that reaction's batch.
    ///
    /// ```ignore
    /// engine.reaction(&ctx, Isolation::Write, |rctx| async move {
    ///     for observed in sweep {
    ///         rctx.raise(observed).await?;
    ///     }
    ///     Ok(())
    /// }).await?;
    /// ```
    pub async fn reaction<T, F, Fut>(&self, ctx: &Context, isolation: Isolation, block: F) -> Result<T>
    where
        F: FnOnce(ReactionContext<D>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_running("reaction")?;

        if ctx.in_reaction() {
            return block(ReactionContext {
                engine: self.clone(),
                ctx: ctx.clone(),
            })
            .await;
        }

        let cid = CorrelationId::new();
        let guard = self
            .inner
            .isolation
            .acquire(Isolation::effective(isolation, true))
            .await;
        debug!(%cid, isolation = ?guard.isolation(), "reaction started");
        self.run_batch(ctx, guard, cid, None, block).await
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), ReactorError> {
        match self.phase() {
            Phase::Running => Ok(()),
            _ => Err(ReactorError::WrongPhase {
                operation,
                required: "a running engine",
            }),
        }
    }

    async fn correct<E: Event>(&self, ctx: &Context, info: &EventInfo<D>, event: E) -> Result<E> {
        let Some(corrector) = &info.corrector else {
            return Ok(event);
        };
        let corrected = corrector
            .correct_any(&event, &self.inner.deps, ctx)
            .await?;
        corrected
            .downcast::<E>()
            .map(|e| *e)
            .map_err(|_| {
                ReactorError::NotRegistered {
                    type_name: std::any::type_name::<E>().to_string(),
                }
                .into()
            })
    }

    async fn raise_nested<E: Event>(
        &self,
        ctx: &Context,
        batch: &Arc<Batch>,
        info: &EventInfo<D>,
        event: E,
    ) -> Result<()> {
        let event = self.correct(ctx, info, event).await?;
        let payload: Arc<dyn AnyEvent> = Arc::new(event);

        let result = match &info.reactor {
            Some(reactor) => {
                let rctx = ReactionContext {
                    engine: self.clone(),
                    ctx: ctx.clone(),
                };
                reactor.react_any(payload.as_ref(), &rctx).await
            }
            None => Ok(()),
        };

        debug!(kind = E::KIND, cid = %batch.cid(), success = result.is_ok(), "nested event queued");
        batch.push(EventEnvelope::new(batch.cid(), payload).with_success(result.is_ok()));
        result
    }

    async fn raise_top<E: Event>(&self, ctx: &Context, info: &EventInfo<D>, event: E) -> Result<()> {
        let cid = CorrelationId::new();

        let Some(reactor) = &info.reactor else {
            let event = self.correct(ctx, info, event).await?;
            self.authorize(ctx, &event).await?;
            let envelope = EventEnvelope::new(cid, Arc::new(event)).with_success(true);
            self.inner.store.persist(std::slice::from_ref(&envelope)).await?;
            self.inner.bus.publish(envelope);
            debug!(kind = E::KIND, %cid, "fact recorded");
            return Ok(());
        };

        let isolation = Isolation::effective(
            reactor.isolation(),
            Event::direction(&event).is_some(),
        );
        let guard = self.inner.isolation.acquire(isolation).await;
        debug!(kind = E::KIND, %cid, ?isolation, identity = %ctx.identity(), "raise started");

        let event = self.correct(ctx, info, event).await?;
        self.authorize(ctx, &event).await?;

        let payload: Arc<dyn AnyEvent> = Arc::new(event);
        let top = payload.clone();
        self.run_batch(ctx, guard, cid, Some(top), move |rctx| async move {
            reactor.react_any(payload.as_ref(), &rctx).await
        })
        .await
    }

    async fn authorize<E: Event>(&self, ctx: &Context, event: &E) -> Result<()> {
        if self.is_allowed(ctx, event).await? {
            return Ok(());
        }
        info!(kind = E::KIND, identity = %ctx.identity(), "raise vetoed");
        Err(ReactorError::access_denied(E::KIND).into())
    }

    /// Run `block` in a fresh batch, then settle the batch.
    async fn run_batch<T, F, Fut>(
        &self,
        ctx: &Context,
        guard: IsolationGuard,
        cid: CorrelationId,
        top: Option<Arc<dyn AnyEvent>>,
        block: F,
    ) -> Result<T>
    where
        F: FnOnce(ReactionContext<D>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let batch = Batch::new(cid, guard.isolation(), true);
        let rctx = ReactionContext {
            engine: self.clone(),
            ctx: ctx.with_batch(batch.clone()),
        };

        let result = match AssertUnwindSafe(block(rctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                error!(%cid, panic = %message, "reactor panicked");
                Err(anyhow!("reactor panicked: {}", message))
            }
        };
        let pending = batch.drain();
        let succeeded = result.is_ok();

        let engine = self.clone();
        let identity = ctx.identity();
        let settlement = tokio::spawn(async move {
            engine.settle(identity, guard, cid, pending, top, succeeded).await
        })
        .await
        .map_err(|e| anyhow!("settling batch {} failed: {}", cid, e))?;

        let outcome = match (result, settlement.storage) {
            (Ok(value), None) => Ok(value),
            (Ok(_), Some(storage)) => Err(storage),
            (Err(e), _) => Err(e),
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(e) if settlement.failures.is_empty() => Err(e),
            Err(e) => Err(e.context(CompensationFailed {
                failures: settlement.failures,
            })),
        }
    }

    /// Persist and broadcast a finished batch, compensating it if it failed.
    /// Releases the isolation guard on return.
    async fn settle(
        &self,
        identity: Identity,
        mut guard: IsolationGuard,
        cid: CorrelationId,
        mut events: Vec<EventEnvelope>,
        top: Option<Arc<dyn AnyEvent>>,
        succeeded: bool,
    ) -> Settlement {
        let mut settlement = Settlement::default();

        if succeeded {
            if let Some(top) = &top {
                events.push(EventEnvelope::new(cid, top.clone()).with_success(true));
            }
            match self.inner.store.persist(&events).await {
                Ok(()) => {
                    debug!(%cid, count = events.len(), "batch committed");
                    self.broadcast(events);
                    return settlement;
                }
                Err(e) => {
                    error!(%cid, error = %e, "persisting batch failed, compensating");
                    settlement.storage = Some(e.into());
                }
            }
        } else {
            debug!(%cid, pending = events.len(), "reaction failed");
        }

        let ctx = Context::new(identity);
        settlement.failures = self.compensate(&ctx, &mut guard, &mut events).await;

        if settlement.storage.is_none() {
            if let Some(top) = top {
                events.push(EventEnvelope::new(cid, top).with_success(false));
            }
        }

        match self.inner.store.persist(&events).await {
            Ok(()) => self.broadcast(events),
            Err(e) => {
                error!(%cid, error = %e, count = events.len(), "persisting failed batch lost its events");
            }
        }
        settlement
    }

    /// Undo the applied reversible events of `events`, newest first.
    ///
    /// Cancellations and the events their reactors raise are appended to
    /// `events`; they are never compensated themselves.
    async fn compensate(
        &self,
        ctx: &Context,
        guard: &mut IsolationGuard,
        events: &mut Vec<EventEnvelope>,
    ) -> Vec<FailedCancellation> {
        let mut failures = Vec::new();
        let applied: Vec<EventEnvelope> = events
            .iter()
            .filter(|e| e.success && !e.is_cancellation() && e.payload.is_cancellable())
            .cloned()
            .collect();

        for original in applied.iter().rev() {
            let Some(info) = self.inner.registry.by_type_id(original.payload.event_type_id()) else {
                continue;
            };
            let Some(reactor) = &info.reactor else {
                continue;
            };
            let Some(cancellation) = original.payload.cancellation() else {
                continue;
            };

            if !guard.is_write() {
                warn!(
                    kind = original.kind,
                    "compensating under Read isolation; its reactor should declare Write"
                );
                guard.upgrade().await;
            }

            warn!(kind = original.kind, event_id = %original.id, cid = %original.cid, "compensating event");
            let sub = Batch::new(original.cid, Isolation::Write, false);
            let rctx = ReactionContext {
                engine: self.clone(),
                ctx: ctx.with_batch(sub.clone()),
            };
            let result = match AssertUnwindSafe(reactor.react_any(cancellation.as_ref(), &rctx))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(anyhow!("reactor panicked: {}", panic_message(&panic))),
            };

            events.extend(sub.drain());
            events.push(EventEnvelope::cancelling(original, cancellation).with_success(result.is_ok()));

            if let Err(e) = result {
                error!(kind = original.kind, event_id = %original.id, error = %e, "compensation failed");
                failures.push(FailedCancellation {
                    event_id: original.id,
                    kind: original.kind,
                    error: format!("{:#}", e),
                });
            }
        }
        failures
    }

    fn broadcast(&self, events: Vec<EventEnvelope>) {
        for envelope in events {
            self.inner.bus.publish(envelope);
        }
    }
}

impl<D> std::fmt::Debug for Engine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &Phase::from_u8(self.inner.phase.load(Ordering::Acquire)))
            .field("bus", &self.inner.bus)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Engine Builder
// =============================================================================

/// Builder for an [`Engine`]. The builder is the initialisation phase: event
/// types and their handlers can only be registered here.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::builder(deps, storage)
///     .with_reactor::<CreateGroup, _>(CreateGroupReactor)
///     .with_reactor::<GroupMembership, _>(MembershipReactor)
///     .with_corrector::<ChangeServerImage, _>(FillPreviousImage)
///     .with_veto::<CreateGroup, _>(AdminOnly)
///     .with_interface_veto(&USER_EVENT, SelfService)
///     .register::<ContainerObserved>()
///     .build()?;
/// engine.start().await?;
/// ```
pub struct EngineBuilder<D> {
    deps: Arc<D>,
    storage: Arc<dyn Storage>,
    registry: EventRegistry<D>,
    bus_capacity: usize,
}

impl<D: Send + Sync + 'static> EngineBuilder<D> {
    pub fn new(deps: D, storage: Arc<dyn Storage>) -> Self {
        Self::with_arc(Arc::new(deps), storage)
    }

    /// Use this when the deps are shared with other parts of the system.
    pub fn with_arc(deps: Arc<D>, storage: Arc<dyn Storage>) -> Self {
        Self {
            deps,
            storage,
            registry: EventRegistry::default(),
            bus_capacity: crate::bus::DEFAULT_CAPACITY,
        }
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Register an event type without handlers. Idempotent.
    pub fn register<E: Event>(mut self) -> Self {
        self.registry.register::<E>();
        self
    }

    /// Register the reactor of an event type. The last registration wins.
    pub fn with_reactor<E, R>(mut self, reactor: R) -> Self
    where
        E: Event,
        R: Reactor<E, D>,
    {
        let info = self.registry.register::<E>();
        if info.reactor.is_some() {
            debug!(kind = E::KIND, "replacing reactor");
        }
        info.reactor = Some(Box::new(ReactorWrapper::new(reactor)));
        self
    }

    /// Register a reactor, failing if the type already has one.
    pub fn try_with_reactor<E, R>(self, reactor: R) -> Result<Self>
    where
        E: Event,
        R: Reactor<E, D>,
    {
        if self
            .registry
            .describe::<E>()
            .is_ok_and(|info| info.has_reactor())
        {
            return Err(anyhow!("reactor already registered for {}", E::KIND));
        }
        Ok(self.with_reactor::<E, R>(reactor))
    }

    /// Register the corrector of an event type. The last registration wins.
    pub fn with_corrector<E, C>(mut self, corrector: C) -> Self
    where
        E: Event,
        C: Corrector<E, D>,
    {
        self.registry.register::<E>().corrector = Some(Box::new(CorrectorWrapper::new(corrector)));
        self
    }

    /// Add a veto for an event type.
    pub fn with_veto<E, V>(mut self, veto: V) -> Self
    where
        E: Event,
        V: Veto<E, D>,
    {
        self.registry
            .register::<E>()
            .vetoes
            .push(Box::new(VetoWrapper::new(veto)));
        self
    }

    /// Add a veto for every event implementing `interface`.
    pub fn with_interface_veto<V>(mut self, interface: &'static crate::Interface, veto: V) -> Self
    where
        V: InterfaceVeto<D>,
    {
        self.registry.add_interface_veto(interface.name, Box::new(veto));
        self
    }

    /// Build the engine. Fails if two registered types share a kind name.
    pub fn build(self) -> Result<Engine<D>> {
        let duplicates = self.registry.duplicate_kinds();
        if !duplicates.is_empty() {
            return Err(anyhow!("event kinds registered twice: {}", duplicates.join(", ")));
        }

        let store = EventStore::new(self.storage, self.registry.descriptors());
        Ok(Engine {
            inner: Arc::new(EngineInner {
                deps: self.deps,
                registry: self.registry,
                store,
                bus: EventBus::with_capacity(self.bus_capacity),
                isolation: IsolationController::new(),
                phase: AtomicU8::new(Phase::Init as u8),
            }),
        })
    }
}
