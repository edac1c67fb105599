//! Testing utilities for reactors and engines.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! reactor = { workspace = true, features = ["testing"] }
//! ```
//!
//! # Recording Reactions
//!
//! ```ignore
//! use reactor::testing::{collect_broadcasts, RecordingReactor};
//!
//! let recorder = RecordingReactor::<Ping>::new();
//! let engine = Engine::builder((), storage)
//!     .with_reactor::<Ping, _>(recorder.clone())
//!     .build()?;
//! let mut rx = engine.subscribe();
//!
//! engine.raise(&Context::system(), Ping { n: 1 }).await?;
//!
//! assert_eq!(recorder.count(), 1);
//! assert_eq!(kinds(&collect_broadcasts(&mut rx)), vec!["ping"]);
//! ```

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::core::{Event, EventEnvelope};
use crate::engine::ReactionContext;
use crate::error::ReactorError;
use crate::isolation::Isolation;
use crate::reactor::Reactor;

type FailWhen<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A reactor that records every event it reacts to.
///
/// Clones share the recording. Optionally fails (with `AlreadyInState`) for
/// events matching a predicate, after recording them.
pub struct RecordingReactor<E> {
    seen: Arc<Mutex<Vec<E>>>,
    isolation: Isolation,
    fail_when: Option<FailWhen<E>>,
}

impl<E: Event> RecordingReactor<E> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            isolation: Isolation::Unknown,
            fail_when: None,
        }
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn failing_when(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Arc::new(predicate));
        self
    }

    /// Every event reacted to, in order.
    pub fn events(&self) -> Vec<E> {
        self.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<E>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<E: Event> Default for RecordingReactor<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RecordingReactor<E> {
    fn clone(&self) -> Self {
        Self {
            seen: self.seen.clone(),
            isolation: self.isolation,
            fail_when: self.fail_when.clone(),
        }
    }
}

#[async_trait]
impl<E, D> Reactor<E, D> for RecordingReactor<E>
where
    E: Event,
    D: Send + Sync + 'static,
{
    fn isolation(&self) -> Isolation {
        self.isolation
    }

    async fn react(&self, event: &E, _ctx: &ReactionContext<D>) -> Result<()> {
        self.lock().push(event.clone());
        if self.fail_when.as_ref().is_some_and(|fail| fail(event)) {
            return Err(ReactorError::already_in_state(E::KIND, "failing").into());
        }
        Ok(())
    }
}

/// Drain every envelope currently buffered in `rx`.
pub fn collect_broadcasts(rx: &mut broadcast::Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(envelope) => out.push(envelope),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

/// Kind names of a sequence of envelopes.
pub fn kinds(envelopes: &[EventEnvelope]) -> Vec<&'static str> {
    envelopes.iter().map(|e| e.kind).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::engine::Engine;
    use crate::memory::MemoryStorage;
    use crate::schema::Schema;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct Ping {
        n: i64,
    }

    impl Event for Ping {
        const KIND: &'static str = "ping";

        fn schema() -> Schema {
            Schema::new().integer("n")
        }
    }

    #[tokio::test]
    async fn test_recording_reactor_records_and_fails() {
        let recorder = RecordingReactor::<Ping>::new().failing_when(|p| p.n < 0);
        let engine = Engine::builder((), Arc::new(MemoryStorage::new()))
            .with_reactor::<Ping, _>(recorder.clone())
            .build()
            .unwrap();
        engine.start().await.unwrap();
        let mut rx = engine.subscribe();

        engine.raise(&Context::system(), Ping { n: 1 }).await.unwrap();
        assert!(engine.raise(&Context::system(), Ping { n: -1 }).await.is_err());

        assert_eq!(recorder.count(), 2);
        let seen = collect_broadcasts(&mut rx);
        assert_eq!(kinds(&seen), vec!["ping", "ping"]);
        assert!(seen[0].success);
        assert!(!seen[1].success);
    }
}
