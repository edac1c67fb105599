//! PostgreSQL storage backend.
//!
//! Every logical table lives in one JSONB row table, `reactor_rows`, keyed by
//! `(table_name, key)`. Table schemas are recorded in `reactor_tables` and
//! rows are validated against them before they are written. Transactions run
//! at `SERIALIZABLE` isolation.
//!
//! Filters compile to JSONB containment (`row @> $filter`), so a filter on a
//! `null` column matches only rows that store an explicit `null`.
//!
//! Serialization failures and deadlocks (SQLSTATE `40001`, `40P01`) surface
//! as [`ReactorError::SerializationFailure`] so callers can rerun the
//! transaction.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use tracing::{debug, trace};

use crate::error::ReactorError;
use crate::schema::{Row, TableSchema};
use crate::storage::{Filter, KeyedRow, Storage, Transaction};

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS reactor_tables (
    name TEXT PRIMARY KEY,
    schema JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS reactor_rows (
    table_name TEXT NOT NULL REFERENCES reactor_tables (name),
    key BIGSERIAL NOT NULL,
    row JSONB NOT NULL,
    PRIMARY KEY (table_name, key)
);

CREATE INDEX IF NOT EXISTS reactor_rows_row_idx ON reactor_rows USING GIN (row jsonb_path_ops);
"#;

const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn storage_error(e: sqlx::Error) -> ReactorError {
    if let sqlx::Error::Database(db) = &e {
        if db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref()))
        {
            return ReactorError::serialization_failure(db.message());
        }
    }
    ReactorError::storage(e.to_string())
}

/// Storage backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
    schemas: Arc<DashMap<String, TableSchema>>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schemas: Arc::new(DashMap::new()),
        }
    }

    /// Connect to `database_url` and create the backing tables.
    pub async fn connect(database_url: &str) -> Result<Self, ReactorError> {
        let pool = PgPool::connect(database_url).await.map_err(storage_error)?;
        let storage = Self::new(pool);
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `reactor_tables` and `reactor_rows` if missing.
    pub async fn migrate(&self) -> Result<(), ReactorError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        debug!("reactor storage tables ready");
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn create_table(&self, table: &TableSchema) -> Result<(), ReactorError> {
        let schema = serde_json::to_value(table).map_err(|e| ReactorError::storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO reactor_tables (name, schema)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&table.name)
        .bind(schema)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        trace!(table = %table.name, "table registered");
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, ReactorError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        Ok(Box::new(PgTransaction {
            tx,
            schemas: self.schemas.clone(),
        }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    schemas: Arc<DashMap<String, TableSchema>>,
}

impl PgTransaction {
    async fn schema(&mut self, table: &str) -> Result<TableSchema, ReactorError> {
        if let Some(schema) = self.schemas.get(table) {
            return Ok(schema.clone());
        }
        let stored: Option<(Json<TableSchema>,)> =
            sqlx::query_as("SELECT schema FROM reactor_tables WHERE name = $1")
                .bind(table)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(storage_error)?;
        let Some((Json(schema),)) = stored else {
            return Err(ReactorError::storage(format!("no such table {}", table)));
        };
        self.schemas.insert(table.to_string(), schema.clone());
        Ok(schema)
    }
}

fn containment(filter: &Filter) -> Value {
    Value::Object(filter.conditions().iter().cloned().collect())
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<KeyedRow>, ReactorError> {
        self.schema(table).await?;
        let rows: Vec<(i64, Json<Row>)> = sqlx::query_as(
            r#"
            SELECT key, row FROM reactor_rows
            WHERE table_name = $1 AND row @> $2
            ORDER BY key
            "#,
        )
        .bind(table)
        .bind(containment(filter))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|(key, Json(row))| KeyedRow { key, row })
            .collect())
    }

    async fn get(&mut self, table: &str, key: i64) -> Result<Option<Row>, ReactorError> {
        self.schema(table).await?;
        let row: Option<(Json<Row>,)> =
            sqlx::query_as("SELECT row FROM reactor_rows WHERE table_name = $1 AND key = $2")
                .bind(table)
                .bind(key)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(storage_error)?;
        Ok(row.map(|(Json(row),)| row))
    }

    async fn insert(&mut self, table: &str, row: Row) -> Result<i64, ReactorError> {
        self.schema(table).await?.validate(&row)?;
        let (key,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO reactor_rows (table_name, row)
            VALUES ($1, $2)
            RETURNING key
            "#,
        )
        .bind(table)
        .bind(Value::Object(row))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(key)
    }

    async fn update(&mut self, table: &str, key: i64, changes: Row) -> Result<Row, ReactorError> {
        self.schema(table).await?.validate_columns(&changes)?;
        let updated: Option<(Json<Row>,)> = sqlx::query_as(
            r#"
            UPDATE reactor_rows SET row = row || $3
            WHERE table_name = $1 AND key = $2
            RETURNING row
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(Value::Object(changes))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        updated
            .map(|(Json(row),)| row)
            .ok_or_else(|| ReactorError::not_exists(format!("{} #{}", table, key)))
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, ReactorError> {
        self.schema(table).await?;
        let result = sqlx::query("DELETE FROM reactor_rows WHERE table_name = $1 AND row @> $2")
            .bind(table)
            .bind(containment(filter))
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_key(&mut self, table: &str, key: i64) -> Result<bool, ReactorError> {
        self.schema(table).await?;
        let result = sqlx::query("DELETE FROM reactor_rows WHERE table_name = $1 AND key = $2")
            .bind(table)
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), ReactorError> {
        self.tx.commit().await.map_err(storage_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), ReactorError> {
        self.tx.rollback().await.map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_compiles_to_containment() {
        let filter = Filter::eq("group_id", 3).and_eq("user_id", 7);
        assert_eq!(containment(&filter), json!({"group_id": 3, "user_id": 7}));
        assert_eq!(containment(&Filter::all()), json!({}));
    }
}
