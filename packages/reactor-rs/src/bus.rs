//! Broadcast bus of committed events.
//!
//! # Guarantees
//!
//! - **Committed only**: the engine publishes an envelope after its batch has
//!   been persisted, in persistence order (nested events first, the top-level
//!   event last, compensations after the events they cancel)
//! - **At-most-once delivery**: slow receivers may miss events
//! - **No replay**: lagged receivers get `RecvError::Lagged`; use the
//!   [`EventStore`](crate::EventStore) for history

use tokio::sync::broadcast;

use crate::core::EventEnvelope;

/// Envelopes buffered per receiver before it lags.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Type-erased event bus for broadcasting committed events.
///
/// # Example
///
/// ```ignore
/// let mut receiver = engine.subscribe();
///
/// engine.raise(&ctx, CreateGroup::new("g1")).await?;
///
/// let envelope = receiver.recv().await?;
/// if let Some(created) = envelope.downcast_ref::<CreateGroup>() {
///     println!("group created: {}", created.name);
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus buffering up to `capacity` envelopes per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to every current receiver; returns how many there were.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// A receiver for envelopes published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CorrelationId, Event};
    use crate::schema::Schema;
    use serde::Serialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize)]
    struct Tick {
        value: i64,
    }

    impl Event for Tick {
        const KIND: &'static str = "tick";

        fn schema() -> Schema {
            Schema::new().integer("value")
        }
    }

    fn tick(value: i64) -> EventEnvelope {
        EventEnvelope::new(CorrelationId::new(), Arc::new(Tick { value })).with_success(true)
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(tick(42));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.downcast_ref::<Tick>().unwrap().value, 42);
    }

    #[tokio::test]
    async fn test_publish_returns_receiver_count() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(tick(1)), 0);

        let _r1 = bus.subscribe();
        assert_eq!(bus.publish(tick(2)), 1);

        let _r2 = bus.subscribe();
        assert_eq!(bus.publish(tick(3)), 2);
        assert_eq!(bus.receiver_count(), 2);
    }

    #[tokio::test]
    async fn test_clone_shares_channel_and_preserves_order() {
        let bus = EventBus::with_capacity(16);
        let other = bus.clone();
        let mut receiver = bus.subscribe();

        for i in 0..5 {
            other.publish(tick(i));
        }
        for i in 0..5 {
            let envelope = receiver.recv().await.unwrap();
            assert_eq!(envelope.downcast_ref::<Tick>().unwrap().value, i);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_events() {
        let bus = EventBus::new();
        bus.publish(tick(1));

        let mut receiver = bus.subscribe();
        bus.publish(tick(2));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.downcast_ref::<Tick>().unwrap().value, 2);
    }
}
