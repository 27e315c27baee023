//! Integration tests for the store schema: create, reset, recreate.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use feedmirror::model::{Entry, Origin};
use feedmirror::storage::{managed_indexes, managed_tables, managed_views, Database, SyncError};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

async fn object_names(db: &Database, object_type: &str) -> Vec<String> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = ? AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .bind(object_type)
    .fetch_all(db.pool())
    .await
    .unwrap();
    rows.into_iter().map(|(name,)| name).collect()
}

fn sorted(names: impl Iterator<Item = &'static str>) -> Vec<String> {
    let mut names: Vec<String> = names.map(str::to_string).collect();
    names.sort();
    names
}

fn minimal_entry() -> Entry {
    Entry {
        id: "E1".to_string(),
        title: "Hello".to_string(),
        author: None,
        content: None,
        summary: None,
        crawled: 1,
        recrawled: None,
        published: 1,
        updated: None,
        unread: true,
        keywords: Vec::new(),
        engagement: None,
        engagement_rate: None,
        origin_id: "o1".to_string(),
        fingerprint: "fp1".to_string(),
        origin: Origin {
            stream_id: "feed/F1".to_string(),
            title: None,
            html_url: None,
        },
        visual: None,
        enclosures: Vec::new(),
        tags: Vec::new(),
        categories: Vec::new(),
    }
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_open_creates_every_managed_object() {
    let db = test_db().await;
    assert_eq!(object_names(&db, "table").await, sorted(managed_tables()));
    assert_eq!(object_names(&db, "index").await, sorted(managed_indexes()));
    assert_eq!(object_names(&db, "view").await, sorted(managed_views()));
}

#[tokio::test]
async fn test_create_keeps_existing_rows() {
    let db = test_db().await;
    db.materialize_entries(&[minimal_entry()]).await.unwrap();

    db.create_schema().await.unwrap();

    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn test_views_are_read_only() {
    let db = test_db().await;
    let result = sqlx::query("INSERT INTO entries_by_tag (id) VALUES ('x')")
        .execute(db.pool())
        .await;
    assert!(result.is_err());
}

// ============================================================================
// Reset
// ============================================================================

#[tokio::test]
async fn test_reset_then_create_yields_empty_store() {
    let db = test_db().await;
    db.materialize_entries(&[minimal_entry()]).await.unwrap();

    db.reset_schema().await.unwrap();
    assert!(object_names(&db, "table").await.is_empty());
    assert!(object_names(&db, "view").await.is_empty());

    db.create_schema().await.unwrap();
    assert_eq!(object_names(&db, "table").await, sorted(managed_tables()));

    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_reset_twice_succeeds() {
    let db = test_db().await;
    db.reset_schema().await.unwrap();
    db.reset_schema().await.unwrap();
}

#[tokio::test]
async fn test_materialize_without_schema_is_schema_error() {
    let db = test_db().await;
    db.reset_schema().await.unwrap();

    let err = db.materialize_entries(&[minimal_entry()]).await.unwrap_err();
    assert!(matches!(err, SyncError::Schema(_)), "unexpected error: {err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unrelated_tables_survive_reset() {
    let db = test_db().await;
    sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY)")
        .execute(db.pool())
        .await
        .unwrap();

    db.reset_schema().await.unwrap();
    assert_eq!(object_names(&db, "table").await, vec!["notes".to_string()]);
}
