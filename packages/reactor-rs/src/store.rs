//! Event store: persisted layout of raised events.
//!
//! Each persisted event occupies:
//! - one row in the base table `events` (id, kind, success, timestamp,
//!   correlation, cancelled event),
//! - one row in its kind table `event_<kind>` holding its own fields,
//! - one row per implemented interface in `event_if_<interface>`, holding the
//!   interface's columns.
//!
//! Kind and interface rows reference the base row through `event_key`, so
//! events can be queried polymorphically through any interface they carry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::core::EventEnvelope;
use crate::error::ReactorError;
use crate::registry::EventDescriptor;
use crate::schema::{ColumnType, Row, Schema, TableSchema};
use crate::storage::{retry_serializable, Filter, KeyedRow, Storage, Transaction};

pub const EVENTS_TABLE: &str = "events";

pub fn kind_table(kind: &str) -> String {
    format!("event_{}", kind)
}

pub fn interface_table(name: &str) -> String {
    format!("event_if_{}", name)
}

fn base_schema() -> Schema {
    Schema::new()
        .text("event_id")
        .text("kind")
        .boolean("success")
        .timestamp("raised_at")
        .text("correlation_id")
        .optional("cancels", ColumnType::Text)
}

/// A persisted event read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub key: i64,
    pub event_id: Uuid,
    pub kind: String,
    pub success: bool,
    pub raised_at: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub cancels: Option<Uuid>,
    /// The event's own fields.
    pub fields: Row,
}

impl StoredEvent {
    /// Deserialize the event fields back into their event type.
    pub fn decode<E: serde::de::DeserializeOwned>(&self) -> Result<E, ReactorError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            ReactorError::SchemaViolation {
                table: kind_table(&self.kind),
                message: e.to_string(),
            }
        })
    }
}

/// Persists envelopes and reads them back.
pub struct EventStore {
    storage: Arc<dyn Storage>,
    kinds: HashMap<&'static str, EventDescriptor>,
}

impl EventStore {
    pub fn new(storage: Arc<dyn Storage>, descriptors: impl IntoIterator<Item = EventDescriptor>) -> Self {
        Self {
            storage,
            kinds: descriptors.into_iter().map(|d| (d.kind, d)).collect(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Create the base, kind and interface tables of every registered kind.
    pub async fn create_schema(&self) -> Result<(), ReactorError> {
        self.storage
            .create_table(&TableSchema::new(EVENTS_TABLE, base_schema()))
            .await?;
        for descriptor in self.kinds.values() {
            self.storage
                .create_table(&TableSchema::new(
                    kind_table(descriptor.kind),
                    keyed(&descriptor.schema),
                ))
                .await?;
            for iface in &descriptor.interfaces {
                self.storage
                    .create_table(&TableSchema::new(
                        interface_table(iface.name),
                        keyed(&(iface.schema)()),
                    ))
                    .await?;
            }
        }
        Ok(())
    }

    /// Persist a batch of envelopes atomically, in order.
    pub async fn persist(&self, envelopes: &[EventEnvelope]) -> Result<(), ReactorError> {
        if envelopes.is_empty() {
            return Ok(());
        }
        retry_serializable("persist", move || async move {
            let mut tx = self.storage.begin().await?;
            for envelope in envelopes {
                self.write(tx.as_mut(), envelope).await?;
            }
            tx.commit().await?;
            Ok::<_, ReactorError>(())
        })
        .await?;
        debug!(count = envelopes.len(), "persisted event batch");
        Ok(())
    }

    async fn write(&self, tx: &mut dyn Transaction, envelope: &EventEnvelope) -> Result<(), ReactorError> {
        let descriptor = self
            .kinds
            .get(envelope.kind)
            .ok_or_else(|| ReactorError::NotRegistered {
                type_name: envelope.kind.to_string(),
            })?;

        let base = json!({
            "event_id": envelope.id.to_string(),
            "kind": envelope.kind,
            "success": envelope.success,
            "raised_at": envelope.raised_at.to_rfc3339(),
            "correlation_id": envelope.cid.into_inner().to_string(),
            "cancels": envelope.cancels.map(|id| id.to_string()),
        });
        let key = tx.insert(EVENTS_TABLE, into_row(base)).await?;

        let fields = envelope.payload.to_row()?;
        for iface in &descriptor.interfaces {
            let mut row = (iface.schema)().project(&fields);
            row.insert("event_key".into(), json!(key));
            tx.insert(&interface_table(iface.name), row).await?;
        }

        let mut row = fields;
        row.insert("event_key".into(), json!(key));
        tx.insert(&kind_table(descriptor.kind), row).await?;
        Ok(())
    }

    /// Every persisted event, in persistence order.
    pub async fn all(&self) -> Result<Vec<StoredEvent>, ReactorError> {
        self.query(&Filter::all()).await
    }

    /// Persisted events of one kind, in persistence order.
    pub async fn history(&self, kind: &str) -> Result<Vec<StoredEvent>, ReactorError> {
        self.query(&Filter::eq("kind", kind)).await
    }

    /// Persisted events of one correlation batch, in persistence order.
    pub async fn batch(&self, cid: Uuid) -> Result<Vec<StoredEvent>, ReactorError> {
        self.query(&Filter::eq("correlation_id", cid.to_string())).await
    }

    /// Persisted events implementing an interface, in persistence order.
    pub async fn by_interface(&self, name: &str) -> Result<Vec<StoredEvent>, ReactorError> {
        retry_serializable("by_interface", move || self.interface_events(name)).await
    }

    async fn interface_events(&self, name: &str) -> Result<Vec<StoredEvent>, ReactorError> {
        let mut tx = self.storage.begin().await?;
        let links = tx.select(&interface_table(name), &Filter::all()).await?;
        let mut out = Vec::with_capacity(links.len());
        for link in links {
            let key = link
                .row
                .get("event_key")
                .and_then(Value::as_i64)
                .ok_or_else(|| corrupt(&interface_table(name), "event_key"))?;
            if let Some(base) = tx.get(EVENTS_TABLE, key).await? {
                out.push(self.hydrate(tx.as_mut(), KeyedRow { key, row: base }).await?);
            }
        }
        tx.rollback().await?;
        Ok(out)
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<StoredEvent>, ReactorError> {
        retry_serializable("query", move || self.query_once(filter)).await
    }

    async fn query_once(&self, filter: &Filter) -> Result<Vec<StoredEvent>, ReactorError> {
        let mut tx = self.storage.begin().await?;
        let bases = tx.select(EVENTS_TABLE, filter).await?;
        let mut out = Vec::with_capacity(bases.len());
        for base in bases {
            out.push(self.hydrate(tx.as_mut(), base).await?);
        }
        tx.rollback().await?;
        Ok(out)
    }

    async fn hydrate(&self, tx: &mut dyn Transaction, base: KeyedRow) -> Result<StoredEvent, ReactorError> {
        let row = &base.row;
        let kind = text(row, "kind")?.to_string();
        let mut fields = tx
            .select(&kind_table(&kind), &Filter::eq("event_key", base.key))
            .await?
            .into_iter()
            .next()
            .map(|r| r.row)
            .unwrap_or_default();
        fields.remove("event_key");

        let raised_at = DateTime::parse_from_rfc3339(text(row, "raised_at")?)
            .map_err(|_| corrupt(EVENTS_TABLE, "raised_at"))?
            .with_timezone(&Utc);

        Ok(StoredEvent {
            key: base.key,
            event_id: uuid(row, "event_id")?,
            kind,
            success: row.get("success").and_then(Value::as_bool).unwrap_or(false),
            raised_at,
            correlation_id: uuid(row, "correlation_id")?,
            cancels: match row.get("cancels") {
                Some(Value::String(_)) => Some(uuid(row, "cancels")?),
                _ => None,
            },
            fields,
        })
    }
}

fn keyed(schema: &Schema) -> Schema {
    Schema::new().integer("event_key").merge(schema)
}

fn into_row(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        _ => Row::new(),
    }
}

fn text<'a>(row: &'a Row, column: &str) -> Result<&'a str, ReactorError> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| corrupt(EVENTS_TABLE, column))
}

fn uuid(row: &Row, column: &str) -> Result<Uuid, ReactorError> {
    Uuid::parse_str(text(row, column)?).map_err(|_| corrupt(EVENTS_TABLE, column))
}

fn corrupt(table: &str, column: &str) -> ReactorError {
    ReactorError::SchemaViolation {
        table: table.to_string(),
        message: format!("unreadable column {}", column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CorrelationId, Direction, Event, Interface};
    use crate::memory::MemoryStorage;
    use serde::{Deserialize, Serialize};

    fn subject_schema() -> Schema {
        Schema::new().text("subject_kind").integer("subject_id")
    }

    static SUBJECT: Interface = Interface {
        name: "subject",
        schema: subject_schema,
        parents: &[],
    };

    static GRANT_INTERFACES: [&Interface; 1] = [&SUBJECT];

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Grant {
        subject_kind: String,
        subject_id: i64,
        permission: String,
        direction: Direction,
    }

    impl Event for Grant {
        const KIND: &'static str = "grant";

        fn schema() -> Schema {
            subject_schema().text("permission").text("direction")
        }

        fn interfaces() -> &'static [&'static Interface] {
            &GRANT_INTERFACES
        }

        fn direction(&self) -> Option<Direction> {
            Some(self.direction)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        n: i64,
    }

    impl Event for Ping {
        const KIND: &'static str = "ping";

        fn schema() -> Schema {
            Schema::new().integer("n")
        }
    }

    fn grant(permission: &str) -> Grant {
        Grant {
            subject_kind: "user".into(),
            subject_id: 4,
            permission: permission.into(),
            direction: Direction::Forward,
        }
    }

    async fn store() -> (MemoryStorage, EventStore) {
        let storage = MemoryStorage::new();
        let store = EventStore::new(
            Arc::new(storage.clone()),
            [EventDescriptor::of::<Grant>(), EventDescriptor::of::<Ping>()],
        );
        store.create_schema().await.unwrap();
        (storage, store)
    }

    #[tokio::test]
    async fn test_persist_writes_base_kind_and_interface_rows() {
        let (storage, store) = store().await;
        let cid = CorrelationId::new();
        let first = EventEnvelope::new(cid, Arc::new(grant("admin"))).with_success(true);
        let second = EventEnvelope::new(cid, Arc::new(Ping { n: 1 })).with_success(true);
        store.persist(&[first.clone(), second]).await.unwrap();

        assert_eq!(storage.rows(EVENTS_TABLE).await.unwrap().len(), 2);
        assert_eq!(storage.rows("event_grant").await.unwrap().len(), 1);
        let subject_rows = storage.rows("event_if_subject").await.unwrap();
        assert_eq!(subject_rows.len(), 1);
        assert_eq!(subject_rows[0].row["subject_id"], json!(4));
        assert_eq!(subject_rows[0].row["event_key"], json!(1));

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_id, first.id);
        assert_eq!(all[0].decode::<Grant>().unwrap(), grant("admin"));
        assert_eq!(all[1].kind, "ping");
        assert_eq!(store.batch(cid.into_inner()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_by_interface_and_history() {
        let (_, store) = store().await;
        let cid = CorrelationId::new();
        let applied = EventEnvelope::new(cid, Arc::new(grant("servers.manage"))).with_success(true);
        let cancel =
            EventEnvelope::cancelling(&applied, Arc::new(grant("servers.manage"))).with_success(true);
        store
            .persist(&[
                applied.clone(),
                EventEnvelope::new(cid, Arc::new(Ping { n: 2 })),
                cancel,
            ])
            .await
            .unwrap();

        let subjects = store.by_interface("subject").await.unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[1].cancels, Some(applied.id));

        let pings = store.history("ping").await.unwrap();
        assert_eq!(pings.len(), 1);
        assert!(!pings[0].success);
    }

    #[tokio::test]
    async fn test_unregistered_kind_rolls_back_whole_batch() {
        #[derive(Debug, Clone, Serialize)]
        struct Stray;

        impl Event for Stray {
            const KIND: &'static str = "stray";

            fn schema() -> Schema {
                Schema::new()
            }
        }

        let (storage, store) = store().await;
        let cid = CorrelationId::new();
        let result = store
            .persist(&[
                EventEnvelope::new(cid, Arc::new(Ping { n: 3 })),
                EventEnvelope::new(cid, Arc::new(Stray)),
            ])
            .await;
        assert!(matches!(result, Err(ReactorError::NotRegistered { .. })));
        assert!(storage.rows(EVENTS_TABLE).await.unwrap().is_empty());
    }
}
