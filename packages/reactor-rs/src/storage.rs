//! Storage collaborator interface.
//!
//! The engine and the shadow cache never talk to a database directly. They
//! consume this narrow capability: create a table, begin a transaction, and
//! select/insert/update/delete rows by integer key or column equality.
//!
//! Implementations must give read-your-writes inside a transaction and must
//! serialize writers (the in-memory implementation holds a single-writer
//! lock for the lifetime of each transaction). A backend that aborts
//! conflicting transactions reports it as
//! [`ReactorError::SerializationFailure`]; [`retry_serializable`] reruns a
//! whole transaction on that error.
//!
//! # Example
//!
//! ```ignore
//! let mut tx = storage.begin().await?;
//! let key = tx.insert("groups", row).await?;
//! let members = tx.select("group_members", &Filter::eq("group_id", key)).await?;
//! tx.commit().await?;
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ReactorError;
use crate::schema::{Row, TableSchema};

/// Attempts [`retry_serializable`] makes before returning the failure.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Run `transaction` until it does not fail with a serialization failure,
/// at most [`MAX_TRANSACTION_ATTEMPTS`] times.
///
/// `transaction` must begin, run and finish a whole transaction on every
/// call.
pub async fn retry_serializable<T, F, Fut>(operation: &'static str, mut transaction: F) -> Result<T, ReactorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReactorError>>,
{
    let mut attempt = 1;
    loop {
        match transaction().await {
            Err(e) if e.is_retryable() && attempt < MAX_TRANSACTION_ATTEMPTS => {
                debug!(operation, attempt, error = %e, "transaction conflicted, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// A row together with its storage-assigned key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub key: i64,
    pub row: Row,
}

/// Conjunction of column equalities. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

/// Storage backend.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Create a table if it does not exist yet. Idempotent.
    async fn create_table(&self, table: &TableSchema) -> Result<(), ReactorError>;

    /// Begin a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, ReactorError>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Rows matching `filter`, in key order.
    async fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<KeyedRow>, ReactorError>;

    async fn get(&mut self, table: &str, key: i64) -> Result<Option<Row>, ReactorError>;

    /// Insert a full row, returning the key assigned to it.
    async fn insert(&mut self, table: &str, row: Row) -> Result<i64, ReactorError>;

    /// Merge `changes` into the row at `key`, returning the updated row.
    async fn update(&mut self, table: &str, key: i64, changes: Row) -> Result<Row, ReactorError>;

    /// Delete rows matching `filter`, returning how many were removed.
    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, ReactorError>;

    async fn delete_key(&mut self, table: &str, key: i64) -> Result<bool, ReactorError>;

    async fn commit(self: Box<Self>) -> Result<(), ReactorError>;

    async fn rollback(self: Box<Self>) -> Result<(), ReactorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_reruns_serialization_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_serializable("test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(ReactorError::serialization_failure("could not serialize access"));
            }
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_and_skips_other_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_serializable("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ReactorError::serialization_failure("could not serialize access"))
        })
        .await;
        assert!(matches!(result, Err(ReactorError::SerializationFailure { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TRANSACTION_ATTEMPTS);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_serializable("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ReactorError::storage("disk full"))
        })
        .await;
        assert!(matches!(result, Err(ReactorError::Storage { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filter_matches_conjunction() {
        let row = json!({"group_id": 1, "user_id": 2}).as_object().cloned().unwrap();
        assert!(Filter::all().matches(&row));
        assert!(Filter::eq("group_id", 1).matches(&row));
        assert!(Filter::eq("group_id", 1).and_eq("user_id", 2).matches(&row));
        assert!(!Filter::eq("group_id", 1).and_eq("user_id", 3).matches(&row));
        assert!(Filter::eq("missing", Value::Null).matches(&row));
    }
}
