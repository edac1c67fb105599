//! Reactors: the side effect registered for an event type.
//!
//! A reactor applies the state change an event describes: it mutates
//! entities through their controllers, calls external collaborators, and may
//! raise further events through its [`ReactionContext`]. Those nested events
//! join the current batch instead of starting a new reaction.
//!
//! Reactors signal business-rule violations by returning the typed
//! [`ReactorError`](crate::ReactorError) outcomes (`AlreadyExists`,
//! `NotExists`, `AlreadyInState`). The engine propagates them to the caller
//! after compensating the batch.
//!
//! A reactor for a reversible event handles both directions: when the engine
//! compensates, it hands the reactor the event's cancellation.

use std::future::Future;
use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::{AnyEvent, Event};
use crate::engine::ReactionContext;
use crate::error::ReactorError;
use crate::isolation::Isolation;

/// Side effect handler for one event type.
///
/// # Example
///
/// ```ignore
/// struct AddMember;
///
/// #[async_trait]
/// impl Reactor<GroupMembership, FleetDeps> for AddMember {
///     fn isolation(&self) -> Isolation {
///         Isolation::Write
///     }
///
///     async fn react(&self, event: &GroupMembership, ctx: &ReactionContext<FleetDeps>) -> Result<()> {
///         if event.direction.is_forward() {
///             ctx.deps().memberships.add(ctx.context(), event.group_id, event.user_id).await
///         } else {
///             ctx.deps().memberships.remove(ctx.context(), event.group_id, event.user_id).await
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Reactor<E: Event, D: Send + Sync + 'static>: Send + Sync + 'static {
    /// Declared isolation class. `Unknown` lets the engine decide from the
    /// event's cancellability.
    fn isolation(&self) -> Isolation {
        Isolation::Unknown
    }

    async fn react(&self, event: &E, ctx: &ReactionContext<D>) -> Result<()>;
}

/// Closure-backed reactor, see [`reactor_fn`].
pub struct FnReactor<F, E, D> {
    isolation: Isolation,
    f: F,
    _phantom: PhantomData<fn(E, D)>,
}

/// Build a reactor from a closure receiving an owned event and context.
///
/// ```ignore
/// builder.with_reactor::<Ping, _>(reactor_fn(Isolation::Read, |ping: Ping, ctx| async move {
///     ctx.raise(Pong { n: ping.n }).await
/// }))
/// ```
pub fn reactor_fn<E, D, F, Fut>(isolation: Isolation, f: F) -> FnReactor<F, E, D>
where
    E: Event,
    D: Send + Sync + 'static,
    F: Fn(E, ReactionContext<D>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnReactor {
        isolation,
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<E, D, F, Fut> Reactor<E, D> for FnReactor<F, E, D>
where
    E: Event,
    D: Send + Sync + 'static,
    F: Fn(E, ReactionContext<D>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn isolation(&self) -> Isolation {
        self.isolation
    }

    async fn react(&self, event: &E, ctx: &ReactionContext<D>) -> Result<()> {
        (self.f)(event.clone(), ctx.clone()).await
    }
}

/// Type-erased reactor for internal use.
#[async_trait]
pub(crate) trait AnyReactor<D>: Send + Sync {
    fn isolation(&self) -> Isolation;

    async fn react_any(&self, event: &dyn AnyEvent, ctx: &ReactionContext<D>) -> Result<()>;
}

pub(crate) struct ReactorWrapper<R, E, D> {
    reactor: R,
    _phantom: PhantomData<fn(E, D)>,
}

impl<R, E, D> ReactorWrapper<R, E, D> {
    pub fn new(reactor: R) -> Self {
        Self {
            reactor,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<R, E, D> AnyReactor<D> for ReactorWrapper<R, E, D>
where
    R: Reactor<E, D>,
    E: Event,
    D: Send + Sync + 'static,
{
    fn isolation(&self) -> Isolation {
        self.reactor.isolation()
    }

    async fn react_any(&self, event: &dyn AnyEvent, ctx: &ReactionContext<D>) -> Result<()> {
        let event = event
            .as_any()
            .downcast_ref::<E>()
            .ok_or_else(|| ReactorError::NotRegistered {
                type_name: std::any::type_name::<E>().to_string(),
            })?;
        self.reactor.react(event, ctx).await
    }
}
