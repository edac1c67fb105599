//! Veto engine: composable authorization predicates.
//!
//! A veto inspects an event and the acting identity and returns a
//! [`Verdict`]. Verdicts fold left to right: any `Deny` short-circuits to
//! `Deny`; otherwise the result is `Allow` if any participant allowed, else
//! `Unknown`. Only `Allow` lets a raise proceed.
//!
//! Vetoes are registered per event type ([`Veto`]) or per interface
//! ([`InterfaceVeto`]). An interface veto sees the event's projection onto the
//! interface's columns, so one predicate covers every kind carrying the
//! interface. Vetoes must not raise events.

use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::Context;
use crate::core::{AnyEvent, Event};
use crate::error::ReactorError;
use crate::schema::Row;

/// Outcome of a single veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Verdict {
    Allow,
    Deny,
    #[default]
    Unknown,
}

impl Verdict {
    /// Combine two verdicts.
    pub fn and(self, other: Verdict) -> Verdict {
        match (self, other) {
            (Verdict::Deny, _) | (_, Verdict::Deny) => Verdict::Deny,
            (Verdict::Allow, _) | (_, Verdict::Allow) => Verdict::Allow,
            _ => Verdict::Unknown,
        }
    }

    /// `Unknown` and `Deny` both count as not allowed.
    pub fn is_allowed(self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn allow_if(condition: bool) -> Verdict {
        if condition {
            Verdict::Allow
        } else {
            Verdict::Unknown
        }
    }
}

/// Fold verdicts left to right, stopping at the first `Deny`.
pub fn compose(verdicts: impl IntoIterator<Item = Verdict>) -> Verdict {
    let mut acc = Verdict::Unknown;
    for verdict in verdicts {
        acc = acc.and(verdict);
        if acc == Verdict::Deny {
            break;
        }
    }
    acc
}

/// A veto for one event type.
///
/// # Example
///
/// ```ignore
/// struct DenyAnonymous;
///
/// #[async_trait]
/// impl Veto<CreateGroup, FleetDeps> for DenyAnonymous {
///     async fn impose(&self, _: &CreateGroup, _: &FleetDeps, ctx: &Context) -> Result<Verdict> {
///         Ok(match ctx.identity() {
///             Identity::Anonymous => Verdict::Deny,
///             _ => Verdict::Unknown,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Veto<E: Event, D: Send + Sync + 'static>: Send + Sync + 'static {
    async fn impose(&self, event: &E, deps: &D, ctx: &Context) -> Result<Verdict>;
}

/// A veto for every event implementing an interface.
///
/// `row` holds the event's values for the interface's columns.
#[async_trait]
pub trait InterfaceVeto<D>: Send + Sync + 'static {
    async fn impose(&self, row: &Row, deps: &D, ctx: &Context) -> Result<Verdict>;
}

#[async_trait]
pub(crate) trait AnyVeto<D>: Send + Sync {
    async fn impose_any(&self, event: &dyn AnyEvent, deps: &D, ctx: &Context) -> Result<Verdict>;
}

pub(crate) struct VetoWrapper<V, E, D> {
    veto: V,
    _phantom: PhantomData<fn(E, D)>,
}

impl<V, E, D> VetoWrapper<V, E, D> {
    pub fn new(veto: V) -> Self {
        Self {
            veto,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<V, E, D> AnyVeto<D> for VetoWrapper<V, E, D>
where
    V: Veto<E, D>,
    E: Event,
    D: Send + Sync + 'static,
{
    async fn impose_any(&self, event: &dyn AnyEvent, deps: &D, ctx: &Context) -> Result<Verdict> {
        let event = event
            .as_any()
            .downcast_ref::<E>()
            .ok_or_else(|| ReactorError::NotRegistered {
                type_name: std::any::type_name::<E>().to_string(),
            })?;
        self.veto.impose(event, deps, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_deny_short_circuits_regardless_of_position() {
        use Verdict::*;
        assert_eq!(compose([Unknown, Deny, Allow]), Deny);
        assert_eq!(compose([Allow, Deny]), Deny);
        assert_eq!(compose([Deny, Allow]), Deny);
    }

    #[test]
    fn test_compose_allow_and_unknown() {
        use Verdict::*;
        assert_eq!(compose([Unknown, Allow, Unknown]), Allow);
        assert_eq!(compose([Unknown, Unknown]), Unknown);
        assert_eq!(compose([]), Unknown);
    }

    #[test]
    fn test_only_allow_is_allowed() {
        assert!(Verdict::Allow.is_allowed());
        assert!(!Verdict::Unknown.is_allowed());
        assert!(!Verdict::Deny.is_allowed());
        assert_eq!(Verdict::allow_if(false), Verdict::Unknown);
    }
}
