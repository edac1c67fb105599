//! Correctors: pre-reaction enrichment of events.
//!
//! A corrector runs once, before vetoes and the reaction, and fills fields
//! the caller could not know, typically the previous value a reversible event
//! needs in order to be undone. Reactors relying on such fields require a
//! corrector to be registered for their event type.

use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::Context;
use crate::core::{AnyEvent, Event};
use crate::error::ReactorError;

/// Transform applied to an event before it is vetoed and reacted to.
///
/// # Example
///
/// ```ignore
/// struct FillPreviousImage;
///
/// #[async_trait]
/// impl Corrector<ChangeServerImage, FleetDeps> for FillPreviousImage {
///     async fn correct(&self, mut event: ChangeServerImage, deps: &FleetDeps, _: &Context)
///         -> Result<ChangeServerImage>
///     {
///         let server = deps.servers.get(event.server_id).await?;
///         event.was = Some(server.with(|s| s.image.clone())?);
///         Ok(event)
///     }
/// }
/// ```
#[async_trait]
pub trait Corrector<E: Event, D: Send + Sync + 'static>: Send + Sync + 'static {
    async fn correct(&self, event: E, deps: &D, ctx: &Context) -> Result<E>;
}

#[async_trait]
pub(crate) trait AnyCorrector<D>: Send + Sync {
    async fn correct_any(&self, event: &dyn AnyEvent, deps: &D, ctx: &Context) -> Result<Box<dyn std::any::Any + Send>>;
}

pub(crate) struct CorrectorWrapper<C, E, D> {
    corrector: C,
    _phantom: PhantomData<fn(E, D)>,
}

impl<C, E, D> CorrectorWrapper<C, E, D> {
    pub fn new(corrector: C) -> Self {
        Self {
            corrector,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<C, E, D> AnyCorrector<D> for CorrectorWrapper<C, E, D>
where
    C: Corrector<E, D>,
    E: Event,
    D: Send + Sync + 'static,
{
    async fn correct_any(&self, event: &dyn AnyEvent, deps: &D, ctx: &Context) -> Result<Box<dyn std::any::Any + Send>> {
        let event = event
            .as_any()
            .downcast_ref::<E>()
            .cloned()
            .ok_or_else(|| ReactorError::NotRegistered {
                type_name: std::any::type_name::<E>().to_string(),
            })?;
        let corrected = self.corrector.correct(event, deps, ctx).await?;
        Ok(Box::new(corrected))
    }
}
