//! Core traits for the reaction engine.
//!
//! # Overview
//!
//! An [`Event`] is an immutable record of one intended (or applied) state
//! change. Events are the only path through which state mutates: a caller
//! raises an event, the engine corrects, vetoes and reacts to it, and the
//! event is persisted and broadcast once the reaction commits.
//!
//! # Reversible Events
//!
//! Events that report a [`Direction`] are reversible ("cancellable"). The
//! engine compensates a failed batch by synthesizing the cancellation of each
//! applied reversible event ([`Event::reversed`]) and reacting to it. A
//! persisted event is never mutated; its cancellation is a new event.
//!
//! # Interfaces
//!
//! Events may implement any number of marker [`Interface`]s ("touches a user",
//! "touches a permission subject"). Each interface has its own schema and
//! storage table, and vetoes can be registered per interface.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::ReactorError;
use crate::schema::{Row, Schema};

/// Correlation ID shared by every event raised within one top-level batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Sentinel value for uncorrelated events.
    pub const NONE: Self = Self(Uuid::nil());

    /// Create a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_none(&self) -> bool {
        self.0.is_nil()
    }

    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Direction of a reversible event: apply or undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn is_forward(self) -> bool {
        matches!(self, Direction::Forward)
    }
}

/// A marker interface an event type may implement.
///
/// Interfaces form a lattice through `parents`; an event implementing an
/// interface implements all of its ancestors as well.
///
/// ```ignore
/// pub static SUBJECT: Interface = Interface {
///     name: "subject",
///     schema: subject_schema,
///     parents: &[],
/// };
///
/// pub static USER_EVENT: Interface = Interface {
///     name: "user_event",
///     schema: user_event_schema,
///     parents: &[&SUBJECT],
/// };
/// ```
pub struct Interface {
    pub name: &'static str,
    /// Columns of the interface table, projected from the event row by name.
    pub schema: fn() -> Schema,
    pub parents: &'static [&'static Interface],
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Interface {}

/// Transitive closure of a set of interfaces, parents after children,
/// without duplicates.
pub fn interface_closure(
    direct: &[&'static Interface],
) -> SmallVec<[&'static Interface; 4]> {
    let mut out: SmallVec<[&'static Interface; 4]> = SmallVec::new();
    let mut stack: Vec<&'static Interface> = direct.iter().rev().copied().collect();
    while let Some(iface) = stack.pop() {
        if out.iter().any(|seen| seen.name == iface.name) {
            continue;
        }
        out.push(iface);
        stack.extend(iface.parents.iter().rev().copied());
    }
    out
}

/// A fact record describing one state transition.
///
/// Implementations are plain serializable structs. The explicit [`Schema`]
/// lists the columns of the per-kind event table; every field serialized by
/// the event must appear in it.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct GroupMembership {
///     pub group_id: i64,
///     pub user_id: i64,
///     pub direction: Direction,
/// }
///
/// impl Event for GroupMembership {
///     const KIND: &'static str = "group_membership";
///
///     fn schema() -> Schema {
///         Schema::new().integer("group_id").integer("user_id").text("direction")
///     }
///
///     fn direction(&self) -> Option<Direction> {
///         Some(self.direction)
///     }
///
///     fn reversed(&self) -> Option<Self> {
///         Some(Self { direction: self.direction.flip(), ..self.clone() })
///     }
/// }
/// ```
pub trait Event: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Stable kind name, used as type tag and table suffix.
    const KIND: &'static str;

    /// Columns of the per-kind event table.
    fn schema() -> Schema;

    /// Interfaces this kind implements directly. Ancestors are implied.
    fn interfaces() -> &'static [&'static Interface] {
        &[]
    }

    /// `Some` for reversible events.
    fn direction(&self) -> Option<Direction> {
        None
    }

    /// The cancellation of this event, for reversible events.
    fn reversed(&self) -> Option<Self> {
        None
    }
}

/// Object-safe view of an [`Event`], implemented for every event type.
pub trait AnyEvent: erased_serde::Serialize + fmt::Debug + Send + Sync + 'static {
    fn event_kind(&self) -> &'static str;

    fn event_type_id(&self) -> TypeId;

    fn event_direction(&self) -> Option<Direction>;

    fn is_cancellable(&self) -> bool {
        self.event_direction().is_some()
    }

    /// Synthesize the cancellation of this event.
    fn cancellation(&self) -> Option<Arc<dyn AnyEvent>>;

    /// Serialize the event into a row of its kind table.
    fn to_row(&self) -> Result<Row, ReactorError>;

    fn as_any(&self) -> &dyn Any;
}

impl<E: Event> AnyEvent for E {
    fn event_kind(&self) -> &'static str {
        E::KIND
    }

    fn event_type_id(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn event_direction(&self) -> Option<Direction> {
        Event::direction(self)
    }

    fn cancellation(&self) -> Option<Arc<dyn AnyEvent>> {
        Event::reversed(self).map(|e| Arc::new(e) as Arc<dyn AnyEvent>)
    }

    fn to_row(&self) -> Result<Row, ReactorError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(row)) => Ok(row),
            Ok(other) => Err(ReactorError::SchemaViolation {
                table: E::KIND.to_string(),
                message: format!("event must serialize to an object, got {}", other),
            }),
            Err(e) => Err(ReactorError::SchemaViolation {
                table: E::KIND.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

erased_serde::serialize_trait_object!(AnyEvent);

/// An event together with its batch bookkeeping.
///
/// Envelopes are what the engine queues in a batch, persists, and broadcasts
/// on the [`EventBus`](crate::EventBus).
#[derive(Clone)]
pub struct EventEnvelope {
    /// Unique id of this event occurrence.
    pub id: Uuid,
    /// Correlation id of the top-level batch that produced it.
    pub cid: CorrelationId,
    pub kind: &'static str,
    /// False if the reaction failed or the event was never applied.
    pub success: bool,
    /// For compensations: the id of the event being cancelled.
    pub cancels: Option<Uuid>,
    pub raised_at: DateTime<Utc>,
    pub payload: Arc<dyn AnyEvent>,
}

impl EventEnvelope {
    pub fn new(cid: CorrelationId, payload: Arc<dyn AnyEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cid,
            kind: payload.event_kind(),
            success: false,
            cancels: None,
            raised_at: Utc::now(),
            payload,
        }
    }

    /// Envelope for the cancellation of `original`.
    pub fn cancelling(original: &EventEnvelope, payload: Arc<dyn AnyEvent>) -> Self {
        let mut envelope = Self::new(original.cid, payload);
        envelope.cancels = Some(original.id);
        envelope
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Downcast the payload to a concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.payload.as_any().downcast_ref()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.payload.event_type_id() == TypeId::of::<E>()
    }

    pub fn is_cancellation(&self) -> bool {
        self.cancels.is_some()
    }
}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("id", &self.id)
            .field("cid", &self.cid)
            .field("kind", &self.kind)
            .field("success", &self.success)
            .field("cancels", &self.cancels)
            .field("payload", &self.payload)
            .finish()
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("EventEnvelope", 7)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("cid", &self.cid)?;
        state.serialize_field("kind", self.kind)?;
        state.serialize_field("success", &self.success)?;
        state.serialize_field("cancels", &self.cancels)?;
        state.serialize_field("raised_at", &self.raised_at)?;
        state.serialize_field("payload", &*self.payload)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject_schema() -> Schema {
        Schema::new().text("subject_kind").integer("subject_id")
    }

    fn user_schema() -> Schema {
        Schema::new().integer("user_id")
    }

    static SUBJECT: Interface = Interface {
        name: "subject",
        schema: subject_schema,
        parents: &[],
    };

    static USER_EVENT: Interface = Interface {
        name: "user_event",
        schema: user_schema,
        parents: &[&SUBJECT],
    };

    static TOGGLE_INTERFACES: [&Interface; 2] = [&USER_EVENT, &SUBJECT];

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Toggle {
        user_id: i64,
        direction: Direction,
    }

    impl Event for Toggle {
        const KIND: &'static str = "toggle";

        fn schema() -> Schema {
            Schema::new().integer("user_id").text("direction")
        }

        fn interfaces() -> &'static [&'static Interface] {
            &TOGGLE_INTERFACES
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

    #[test]
    fn test_interface_closure_dedups_and_includes_parents() {
        let closure = interface_closure(Toggle::interfaces());
        let names: Vec<_> = closure.iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["user_event", "subject"]);
    }

    #[test]
    fn test_cancellation_flips_direction() {
        let event: Arc<dyn AnyEvent> = Arc::new(Toggle {
            user_id: 7,
            direction: Direction::Forward,
        });
        assert!(event.is_cancellable());

        let cancel = event.cancellation().unwrap();
        let cancel = cancel.as_any().downcast_ref::<Toggle>().unwrap();
        assert_eq!(cancel.direction, Direction::Backward);
        assert_eq!(cancel.user_id, 7);
    }

    #[test]
    fn test_to_row_serializes_fields() {
        let event = Toggle {
            user_id: 7,
            direction: Direction::Backward,
        };
        let row = AnyEvent::to_row(&event).unwrap();
        assert_eq!(row["user_id"], json!(7));
        assert_eq!(row["direction"], json!("backward"));
    }

    #[test]
    fn test_envelope_downcast_and_serialize() {
        let envelope = EventEnvelope::new(
            CorrelationId::new(),
            Arc::new(Toggle {
                user_id: 1,
                direction: Direction::Forward,
            }),
        )
        .with_success(true);

        assert!(envelope.is::<Toggle>());
        assert_eq!(envelope.downcast_ref::<Toggle>().unwrap().user_id, 1);

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], json!("toggle"));
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["payload"]["direction"], json!("forward"));

        let cancel = EventEnvelope::cancelling(&envelope, envelope.payload.cancellation().unwrap());
        assert_eq!(cancel.cancels, Some(envelope.id));
        assert_eq!(cancel.cid, envelope.cid);
        assert!(!cancel.success);
    }
}
