//! PostgreSQL storage tests against a throwaway container.
//!
//! Run with: cargo test -p reactor --features postgres --test pg_storage_tests

#![cfg(feature = "postgres")]

use reactor::{Filter, PgStorage, ReactorError, Schema, Storage, TableSchema};
use serde_json::{json, Value};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

fn row(value: Value) -> reactor::Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("row literal must be an object"),
    }
}

async fn storage() -> (PgStorage, ContainerAsync<Postgres>) {
    // Run tests with: RUST_LOG=reactor=trace cargo test ... -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let container = Postgres::default()
        .with_tag("16")
        .start()
        .await
        .expect("Failed to start Postgres container");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let storage = PgStorage::connect(&url).await.unwrap();
    storage
        .create_table(&TableSchema::new(
            "group_members",
            Schema::new().integer("group_id").integer("user_id"),
        ))
        .await
        .unwrap();
    (storage, container)
}

#[tokio::test]
async fn test_commit_rollback_and_filters() {
    let (storage, _container) = storage().await;

    let mut tx = storage.begin().await.unwrap();
    let first = tx
        .insert("group_members", row(json!({"group_id": 1, "user_id": 7})))
        .await
        .unwrap();
    tx.insert("group_members", row(json!({"group_id": 2, "user_id": 7})))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    tx.insert("group_members", row(json!({"group_id": 3, "user_id": 7})))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    let all = tx.select("group_members", &Filter::eq("user_id", 7)).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].key, first);

    let updated = tx
        .update("group_members", first, row(json!({"group_id": 5})))
        .await
        .unwrap();
    assert_eq!(updated.get("group_id"), Some(&json!(5)));
    assert_eq!(updated.get("user_id"), Some(&json!(7)));

    let removed = tx
        .delete("group_members", &Filter::eq("group_id", 2))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_rows_are_validated_against_schema() {
    let (storage, _container) = storage().await;

    let mut tx = storage.begin().await.unwrap();
    let err = tx
        .insert("group_members", row(json!({"group_id": "one", "user_id": 7})))
        .await
        .unwrap_err();
    assert!(matches!(err, ReactorError::SchemaViolation { .. }));

    let err = tx.get("missing", 1).await.unwrap_err();
    assert!(matches!(err, ReactorError::Storage { .. }));
}
