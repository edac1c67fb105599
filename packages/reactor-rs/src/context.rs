//! Explicit context threaded through every engine call.
//!
//! A [`Context`] carries the acting [`Identity`] and, while a reaction is
//! running, a handle to its [`Batch`] (the reactor context). Nested raises
//! find the batch in the context and enqueue into it instead of starting a
//! new top-level reaction. Entity mutation requires an active batch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{CorrelationId, EventEnvelope};
use crate::error::ReactorError;
use crate::isolation::Isolation;

/// The identity on whose behalf a reaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    /// Unrestricted; vetoes are not consulted.
    System,
    User(i64),
    Group(i64),
    Service(i64),
    Anonymous,
}

impl Identity {
    pub fn is_system(&self) -> bool {
        matches!(self, Identity::System)
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Identity::User(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::System => write!(f, "system"),
            Identity::User(id) => write!(f, "user:{}", id),
            Identity::Group(id) => write!(f, "group:{}", id),
            Identity::Service(id) => write!(f, "service:{}", id),
            Identity::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Caller context: acting identity plus the active batch, if any.
#[derive(Clone)]
pub struct Context {
    identity: Identity,
    batch: Option<Arc<Batch>>,
}

impl Context {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            batch: None,
        }
    }

    pub fn system() -> Self {
        Self::new(Identity::System)
    }

    pub fn anonymous() -> Self {
        Self::new(Identity::Anonymous)
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn batch(&self) -> Option<&Arc<Batch>> {
        self.batch.as_ref()
    }

    /// True while this context belongs to a running reaction.
    pub fn in_reaction(&self) -> bool {
        self.batch.as_ref().is_some_and(|b| b.is_active())
    }

    /// Fail with `WrongPhase` unless an active reaction owns this context.
    pub fn require_reaction(&self, operation: &'static str) -> Result<&Arc<Batch>, ReactorError> {
        match &self.batch {
            Some(batch) if batch.is_active() => Ok(batch),
            _ => Err(ReactorError::WrongPhase {
                operation,
                required: "an active reaction",
            }),
        }
    }

    pub(crate) fn with_batch(&self, batch: Arc<Batch>) -> Self {
        Self {
            identity: self.identity,
            batch: Some(batch),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("identity", &self.identity)
            .field("batch", &self.batch.as_ref().map(|b| b.cid()))
            .finish()
    }
}

/// Pending-event queue of one reaction.
///
/// Created by a top-level raise (or by compensation for each cancellation),
/// filled by nested raises in the order their reactions complete, and drained
/// exactly once by its owner. Draining deactivates the batch, so contexts
/// that outlive their reaction can no longer mutate entities.
///
/// A reversible event that raises reversible events is queued after them and
/// therefore compensated before them. Its backward reaction must undo only
/// its own effects; the nested events are cancelled through their own
/// entries.
#[derive(Debug)]
pub struct Batch {
    cid: CorrelationId,
    isolation: Isolation,
    cancellable: bool,
    active: AtomicBool,
    pending: Mutex<Vec<EventEnvelope>>,
}

impl Batch {
    pub(crate) fn new(cid: CorrelationId, isolation: Isolation, cancellable: bool) -> Arc<Self> {
        Arc::new(Self {
            cid,
            isolation,
            cancellable,
            active: AtomicBool::new(true),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn cid(&self) -> CorrelationId {
        self.cid
    }

    /// Isolation the owning reaction acquired.
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// False for batches run while compensating; their events are never
    /// compensated themselves.
    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&self, envelope: EventEnvelope) {
        self.lock().push(envelope);
    }

    pub(crate) fn drain(&self) -> Vec<EventEnvelope> {
        self.active.store(false, Ordering::Release);
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EventEnvelope>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(cid = %self.cid, "batch mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reaction_outside_batch_is_wrong_phase() {
        let ctx = Context::system();
        assert!(!ctx.in_reaction());
        let err = ctx.require_reaction("update").unwrap_err();
        assert!(matches!(err, ReactorError::WrongPhase { operation: "update", .. }));
    }

    #[test]
    fn test_drained_batch_deactivates_context() {
        let batch = Batch::new(CorrelationId::new(), Isolation::Write, true);
        let ctx = Context::new(Identity::User(3)).with_batch(batch.clone());
        assert!(ctx.in_reaction());
        assert!(ctx.require_reaction("update").is_ok());

        assert!(batch.drain().is_empty());
        assert!(!ctx.in_reaction());
        assert!(ctx.require_reaction("update").is_err());
        assert_eq!(ctx.identity(), Identity::User(3));
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::System.to_string(), "system");
        assert_eq!(Identity::User(4).to_string(), "user:4");
        assert_eq!(Identity::User(4).user_id(), Some(4));
        assert_eq!(Identity::Group(4).user_id(), None);
    }
}
