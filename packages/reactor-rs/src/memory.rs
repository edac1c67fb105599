//! In-memory storage backend.
//!
//! Transactions are serializable: `begin` takes the single database lock and
//! writes go straight to the shared tables, so reads see the transaction's
//! own writes and nobody else sees them before `commit`. Every write records
//! how to undo it; rollback, or dropping a transaction without committing,
//! replays that log backwards.
//!
//! Suitable for tests and embedded single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::error::ReactorError;
use crate::schema::{Row, TableSchema};
use crate::storage::{Filter, KeyedRow, Storage, Transaction};

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
    last_key: i64,
}

#[derive(Debug, Default)]
struct Database {
    tables: HashMap<String, Table>,
}

/// Serializable in-memory storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    db: Arc<Mutex<Database>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed rows of a table, in key order.
    pub async fn rows(&self, table: &str) -> Result<Vec<KeyedRow>, ReactorError> {
        let db = self.db.lock().await;
        let table = lookup(&db, table)?;
        Ok(table
            .rows
            .iter()
            .map(|(key, row)| KeyedRow {
                key: *key,
                row: row.clone(),
            })
            .collect())
    }

    pub async fn has_table(&self, table: &str) -> bool {
        self.db.lock().await.tables.contains_key(table)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_table(&self, table: &TableSchema) -> Result<(), ReactorError> {
        let mut db = self.db.lock().await;
        db.tables.entry(table.name.clone()).or_insert_with(|| {
            trace!(table = %table.name, "creating table");
            Table {
                schema: table.clone(),
                rows: BTreeMap::new(),
                last_key: 0,
            }
        });
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, ReactorError> {
        let db = self.db.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction { db, undo: Vec::new() }))
    }
}

/// One step of a transaction's undo log.
#[derive(Debug)]
enum Undo {
    /// Drop an inserted row and rewind the key counter.
    Insert { table: String, key: i64, last_key: i64 },
    /// Put back a row as it was before an update or delete.
    Restore { table: String, key: i64, row: Row },
}

struct MemoryTransaction {
    db: OwnedMutexGuard<Database>,
    undo: Vec<Undo>,
}

impl MemoryTransaction {
    fn undo_all(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        trace!(steps = self.undo.len(), "rolling back transaction");
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Insert { table, key, last_key } => {
                    if let Some(table) = self.db.tables.get_mut(&table) {
                        table.rows.remove(&key);
                        table.last_key = last_key;
                    }
                }
                Undo::Restore { table, key, row } => {
                    if let Some(table) = self.db.tables.get_mut(&table) {
                        table.rows.insert(key, row);
                    }
                }
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.undo_all();
    }
}

fn lookup<'a>(db: &'a Database, table: &str) -> Result<&'a Table, ReactorError> {
    db.tables
        .get(table)
        .ok_or_else(|| ReactorError::storage(format!("no such table {}", table)))
}

fn lookup_mut<'a>(db: &'a mut Database, table: &str) -> Result<&'a mut Table, ReactorError> {
    db.tables
        .get_mut(table)
        .ok_or_else(|| ReactorError::storage(format!("no such table {}", table)))
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<KeyedRow>, ReactorError> {
        let table = lookup(&self.db, table)?;
        Ok(table
            .rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(key, row)| KeyedRow {
                key: *key,
                row: row.clone(),
            })
            .collect())
    }

    async fn get(&mut self, table: &str, key: i64) -> Result<Option<Row>, ReactorError> {
        let table = lookup(&self.db, table)?;
        Ok(table.rows.get(&key).cloned())
    }

    async fn insert(&mut self, name: &str, row: Row) -> Result<i64, ReactorError> {
        let table = lookup_mut(&mut self.db, name)?;
        table.schema.validate(&row)?;
        let last_key = table.last_key;
        table.last_key += 1;
        let key = table.last_key;
        table.rows.insert(key, row);
        self.undo.push(Undo::Insert {
            table: name.to_string(),
            key,
            last_key,
        });
        Ok(key)
    }

    async fn update(&mut self, name: &str, key: i64, changes: Row) -> Result<Row, ReactorError> {
        let table = lookup_mut(&mut self.db, name)?;
        table.schema.validate_columns(&changes)?;
        let row = table
            .rows
            .get_mut(&key)
            .ok_or_else(|| ReactorError::not_exists(format!("{} #{}", name, key)))?;
        let before = row.clone();
        row.extend(changes);
        let updated = row.clone();
        self.undo.push(Undo::Restore {
            table: name.to_string(),
            key,
            row: before,
        });
        Ok(updated)
    }

    async fn delete(&mut self, name: &str, filter: &Filter) -> Result<u64, ReactorError> {
        let table = lookup_mut(&mut self.db, name)?;
        let doomed: Vec<i64> = table
            .rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            if let Some(row) = table.rows.remove(key) {
                self.undo.push(Undo::Restore {
                    table: name.to_string(),
                    key: *key,
                    row,
                });
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_key(&mut self, name: &str, key: i64) -> Result<bool, ReactorError> {
        let table = lookup_mut(&mut self.db, name)?;
        let Some(row) = table.rows.remove(&key) else {
            return Ok(false);
        };
        self.undo.push(Undo::Restore {
            table: name.to_string(),
            key,
            row,
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), ReactorError> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ReactorError> {
        let mut tx = self;
        tx.undo_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .create_table(&TableSchema::new(
                "groups",
                Schema::new().text("name").optional("owner_id", crate::ColumnType::Integer),
            ))
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_commit_publishes_and_read_your_writes() {
        let storage = storage().await;
        let mut tx = storage.begin().await.unwrap();
        let key = tx.insert("groups", row(json!({"name": "g1"}))).await.unwrap();
        assert_eq!(key, 1);
        let seen = tx.get("groups", key).await.unwrap().unwrap();
        assert_eq!(seen["name"], json!("g1"));
        tx.commit().await.unwrap();

        let rows = storage.rows("groups").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, 1);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_changes() {
        let storage = storage().await;

        let mut tx = storage.begin().await.unwrap();
        tx.insert("groups", row(json!({"name": "g1"}))).await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = storage.begin().await.unwrap();
            tx.insert("groups", row(json!({"name": "g2"}))).await.unwrap();
        }

        assert!(storage.rows("groups").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_and_validates() {
        let storage = storage().await;
        let mut tx = storage.begin().await.unwrap();
        let key = tx.insert("groups", row(json!({"name": "g1"}))).await.unwrap();
        let updated = tx
            .update("groups", key, row(json!({"owner_id": 9})))
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("g1"));
        assert_eq!(updated["owner_id"], json!(9));

        assert!(tx.update("groups", key, row(json!({"bogus": 1}))).await.is_err());
        let missing = tx.update("groups", 42, row(json!({"owner_id": 1}))).await;
        assert!(matches!(missing, Err(ReactorError::NotExists { .. })));
    }

    #[tokio::test]
    async fn test_select_and_delete_by_filter() {
        let storage = storage().await;
        let mut tx = storage.begin().await.unwrap();
        for name in ["a", "b", "a"] {
            tx.insert("groups", row(json!({"name": name}))).await.unwrap();
        }
        let found = tx.select("groups", &Filter::eq("name", "a")).await.unwrap();
        assert_eq!(found.iter().map(|r| r.key).collect::<Vec<_>>(), vec![1, 3]);

        assert_eq!(tx.delete("groups", &Filter::eq("name", "a")).await.unwrap(), 2);
        assert!(tx.delete_key("groups", 2).await.unwrap());
        assert!(!tx.delete_key("groups", 2).await.unwrap());
        tx.commit().await.unwrap();
        assert!(storage.rows("groups").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_restores_updated_and_deleted_rows() {
        let storage = storage().await;
        let mut tx = storage.begin().await.unwrap();
        for name in ["a", "b"] {
            tx.insert("groups", row(json!({"name": name}))).await.unwrap();
        }
        tx.commit().await.unwrap();

        {
            let mut tx = storage.begin().await.unwrap();
            tx.update("groups", 1, row(json!({"name": "renamed", "owner_id": 3})))
                .await
                .unwrap();
            tx.update("groups", 1, row(json!({"owner_id": 4}))).await.unwrap();
            assert!(tx.delete_key("groups", 2).await.unwrap());
            assert_eq!(tx.insert("groups", row(json!({"name": "c"}))).await.unwrap(), 3);
            assert_eq!(tx.delete("groups", &Filter::all()).await.unwrap(), 2);
            assert!(tx.select("groups", &Filter::all()).await.unwrap().is_empty());
        }

        let rows = storage.rows("groups").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, row(json!({"name": "a"})));
        assert_eq!(rows[1].row, row(json!({"name": "b"})));

        // the key counter was rewound as well
        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.insert("groups", row(json!({"name": "c"}))).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_table_is_storage_error() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let err = tx.get("nope", 1).await.unwrap_err();
        assert!(matches!(err, ReactorError::Storage { .. }));
    }
}
