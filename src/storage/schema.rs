use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::{CommitMode, SyncError};

// ============================================================================
// Schema Definition
// ============================================================================

/// Tables in creation (dependency) order: every referenced table precedes
/// the tables referencing it.
const TABLES: &[(&str, &str)] = &[
    (
        "files",
        r#"
        CREATE TABLE IF NOT EXISTS files (
            url TEXT PRIMARY KEY NOT NULL,
            mime TEXT,
            retries INTEGER,
            created INTEGER NOT NULL
                DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER))
        )
    "#,
    ),
    (
        "feeds",
        r#"
        CREATE TABLE IF NOT EXISTS feeds (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            sort_id TEXT,
            updated INTEGER,
            website TEXT,
            velocity REAL,
            state TEXT,
            favicon TEXT REFERENCES files(url) ON UPDATE CASCADE
        )
    "#,
    ),
    (
        "categories",
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY NOT NULL,
            label TEXT
        )
    "#,
    ),
    (
        "feeds_categories",
        r#"
        CREATE TABLE IF NOT EXISTS feeds_categories (
            feed_id TEXT NOT NULL
                REFERENCES feeds(id) ON UPDATE CASCADE ON DELETE CASCADE,
            category_id TEXT NOT NULL
                REFERENCES categories(id) ON UPDATE CASCADE ON DELETE CASCADE,
            PRIMARY KEY (feed_id, category_id) ON CONFLICT IGNORE
        )
    "#,
    ),
    (
        "entries",
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT,
            author TEXT,
            content TEXT,
            content_direction TEXT,
            summary TEXT,
            summary_direction TEXT,
            crawled INTEGER NOT NULL,
            recrawled INTEGER,
            published INTEGER NOT NULL,
            updated INTEGER,
            visual_url TEXT REFERENCES files(url) ON UPDATE CASCADE,
            unread INTEGER NOT NULL CHECK (unread IN (0, 1)),
            keywords TEXT,
            engagement INTEGER,
            engagement_rate REAL,
            origin_id TEXT,
            fingerprint TEXT NOT NULL,
            origin_stream_id TEXT,
            origin_title TEXT,
            origin_feed_id TEXT
                REFERENCES feeds(id) ON UPDATE CASCADE ON DELETE CASCADE,
            enclosure_mimes TEXT
        )
    "#,
    ),
    (
        "tags",
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY NOT NULL,
            label TEXT
        )
    "#,
    ),
    (
        "entries_tags",
        r#"
        CREATE TABLE IF NOT EXISTS entries_tags (
            entry_id TEXT NOT NULL
                REFERENCES entries(id) ON UPDATE CASCADE ON DELETE CASCADE,
            tag_id TEXT NOT NULL
                REFERENCES tags(id) ON UPDATE CASCADE ON DELETE CASCADE,
            PRIMARY KEY (entry_id, tag_id) ON CONFLICT IGNORE
        )
    "#,
    ),
];

/// Drop order: relations, then leaves, then roots.
const DROP_ORDER: &[&str] = &[
    "feeds_categories",
    "entries_tags",
    "entries",
    "tags",
    "categories",
    "feeds",
    "files",
];

const INDEXES: &[(&str, &str)] = &[
    ("idx_feeds_title", "CREATE INDEX IF NOT EXISTS idx_feeds_title ON feeds(title)"),
    ("idx_feeds_sort_id", "CREATE INDEX IF NOT EXISTS idx_feeds_sort_id ON feeds(sort_id)"),
    ("idx_feeds_website", "CREATE INDEX IF NOT EXISTS idx_feeds_website ON feeds(website)"),
    ("idx_feeds_favicon", "CREATE INDEX IF NOT EXISTS idx_feeds_favicon ON feeds(favicon)"),
    (
        "idx_categories_label",
        "CREATE INDEX IF NOT EXISTS idx_categories_label ON categories(label)",
    ),
    (
        "idx_feeds_categories_feed_id",
        "CREATE INDEX IF NOT EXISTS idx_feeds_categories_feed_id ON feeds_categories(feed_id)",
    ),
    (
        "idx_feeds_categories_category_id",
        "CREATE INDEX IF NOT EXISTS idx_feeds_categories_category_id ON feeds_categories(category_id)",
    ),
    ("idx_entries_title", "CREATE INDEX IF NOT EXISTS idx_entries_title ON entries(title)"),
    ("idx_entries_author", "CREATE INDEX IF NOT EXISTS idx_entries_author ON entries(author)"),
    (
        "idx_entries_origin_id",
        "CREATE INDEX IF NOT EXISTS idx_entries_origin_id ON entries(origin_id)",
    ),
    (
        "idx_entries_origin_feed_id",
        "CREATE INDEX IF NOT EXISTS idx_entries_origin_feed_id ON entries(origin_feed_id)",
    ),
    (
        "uqx_entries_fingerprint",
        "CREATE UNIQUE INDEX IF NOT EXISTS uqx_entries_fingerprint ON entries(fingerprint)",
    ),
    (
        "idx_entries_visual_url",
        "CREATE INDEX IF NOT EXISTS idx_entries_visual_url ON entries(visual_url)",
    ),
    ("idx_tags_label", "CREATE INDEX IF NOT EXISTS idx_tags_label ON tags(label)"),
    (
        "idx_entries_tags_entry_id",
        "CREATE INDEX IF NOT EXISTS idx_entries_tags_entry_id ON entries_tags(entry_id)",
    ),
    (
        "idx_entries_tags_tag_id",
        "CREATE INDEX IF NOT EXISTS idx_entries_tags_tag_id ON entries_tags(tag_id)",
    ),
];

/// Read-only join views; never written directly.
const VIEWS: &[(&str, &str)] = &[
    (
        "feeds_by_category",
        r#"
        CREATE VIEW IF NOT EXISTS feeds_by_category AS
        SELECT feeds.*, feeds_categories.category_id
        FROM feeds
        INNER JOIN feeds_categories ON feeds.id = feeds_categories.feed_id
    "#,
    ),
    (
        "entries_by_category",
        r#"
        CREATE VIEW IF NOT EXISTS entries_by_category AS
        SELECT entries.*, feeds_categories.category_id
        FROM entries
        INNER JOIN feeds_categories ON entries.origin_feed_id = feeds_categories.feed_id
    "#,
    ),
    (
        "entries_by_tag",
        r#"
        CREATE VIEW IF NOT EXISTS entries_by_tag AS
        SELECT entries.*, entries_tags.tag_id
        FROM entries
        INNER JOIN entries_tags ON entries.id = entries_tags.entry_id
    "#,
    ),
];

/// Names of every table the schema manager owns, in creation order.
pub fn managed_tables() -> impl Iterator<Item = &'static str> {
    TABLES.iter().map(|(name, _)| *name)
}

pub fn managed_indexes() -> impl Iterator<Item = &'static str> {
    INDEXES.iter().map(|(name, _)| *name)
}

pub fn managed_views() -> impl Iterator<Item = &'static str> {
    VIEWS.iter().map(|(name, _)| *name)
}

// ============================================================================
// Database
// ============================================================================

/// Connection and write-path settings for a [`Database`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
    pub commit_mode: CommitMode,
    pub strict_conversion: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
            acquire_timeout: Duration::from_secs(10),
            commit_mode: CommitMode::Atomic,
            strict_conversion: false,
        }
    }
}

/// Handle to the local feed store.
///
/// Cloning is cheap; clones share the pool and the write gate, so at most
/// one materialization runs against the store at a time while readers use
/// the pool freely.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) write_gate: Arc<Mutex<()>>,
    pub(crate) options: StoreOptions,
}

impl Database {
    /// Open a database with default options and create the schema.
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        Self::open_with(path, StoreOptions::default()).await
    }

    /// Open a database and create the schema if needed.
    ///
    /// `":memory:"` opens a private in-memory store shared by every pooled
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::BackendUnavailable` when the file cannot be opened
    /// or is locked by another process.
    pub async fn open_with(path: &str, options: StoreOptions) -> Result<Self, SyncError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Foreign keys are a per-connection setting; configuring them on the
        // connect options applies them to every pooled connection.
        let connect = SqliteConnectOptions::from_str(&url)
            .map_err(SyncError::BackendUnavailable)?
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect)
            .await
            .map_err(SyncError::BackendUnavailable)?;

        tracing::debug!(path = %path, commit_mode = ?options.commit_mode, "Opened feed store");

        let db = Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
            options,
        };
        db.create_schema().await?;
        Ok(db)
    }

    /// Pool for read-side collaborators (views, content access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Create every managed table, index and view.
    ///
    /// Runs in one transaction and uses `IF NOT EXISTS` throughout, so
    /// calling it on an existing schema is a no-op.
    pub async fn create_schema(&self) -> Result<(), SyncError> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(SyncError::from_sqlx)?;

        for (_, ddl) in TABLES.iter().chain(INDEXES).chain(VIEWS) {
            sqlx::query(ddl)
                .execute(&mut *tx)
                .await
                .map_err(SyncError::from_sqlx)?;
        }

        tx.commit().await.map_err(SyncError::from_sqlx)?;
        tracing::debug!(
            tables = TABLES.len(),
            indexes = INDEXES.len(),
            views = VIEWS.len(),
            "Schema ready"
        );
        Ok(())
    }

    /// Drop every managed index, then tables (relations, leaves, roots),
    /// then views.
    ///
    /// Safe on an absent or partially created schema: every statement uses
    /// `IF EXISTS`.
    pub async fn reset_schema(&self) -> Result<(), SyncError> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(SyncError::from_sqlx)?;

        let statements = managed_indexes()
            .map(|name| format!("DROP INDEX IF EXISTS {name}"))
            .chain(DROP_ORDER.iter().map(|name| format!("DROP TABLE IF EXISTS {name}")))
            .chain(managed_views().map(|name| format!("DROP VIEW IF EXISTS {name}")));

        for sql in statements {
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(SyncError::from_sqlx)?;
        }

        tx.commit().await.map_err(SyncError::from_sqlx)?;
        tracing::info!("Schema reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn objects(db: &Database, kind: &str) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = ? AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .bind(kind)
        .fetch_all(&db.pool)
        .await
        .unwrap();
        rows.into_iter().map(|(name,)| name).collect()
    }

    fn sorted(names: impl Iterator<Item = &'static str>) -> Vec<String> {
        let mut names: Vec<String> = names.map(str::to_owned).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_open_creates_everything() {
        let db = test_db().await;
        assert_eq!(objects(&db, "table").await, sorted(managed_tables()));
        assert_eq!(objects(&db, "index").await, sorted(managed_indexes()));
        assert_eq!(objects(&db, "view").await, sorted(managed_views()));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let db = test_db().await;
        db.create_schema().await.unwrap();
        db.create_schema().await.unwrap();
        assert_eq!(objects(&db, "table").await.len(), TABLES.len());
    }

    #[tokio::test]
    async fn test_reset_drops_everything() {
        let db = test_db().await;
        db.reset_schema().await.unwrap();
        assert!(objects(&db, "table").await.is_empty());
        assert!(objects(&db, "index").await.is_empty());
        assert!(objects(&db, "view").await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_twice_and_on_partial_schema() {
        let db = test_db().await;
        db.reset_schema().await.unwrap();
        db.reset_schema().await.unwrap();

        // Only some objects present
        sqlx::query(TABLES[0].1).execute(&db.pool).await.unwrap();
        sqlx::query(TABLES[1].1).execute(&db.pool).await.unwrap();
        sqlx::query(INDEXES[0].1).execute(&db.pool).await.unwrap();
        db.reset_schema().await.unwrap();
        assert!(objects(&db, "table").await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_then_create_restores_schema() {
        let db = test_db().await;
        db.reset_schema().await.unwrap();
        db.create_schema().await.unwrap();
        assert_eq!(objects(&db, "view").await, sorted(managed_views()));
    }

    #[tokio::test]
    async fn test_fingerprint_index_is_unique() {
        let db = test_db().await;
        let (unique,): (i64,) = sqlx::query_as(
            "SELECT \"unique\" FROM pragma_index_list('entries') WHERE name = 'uqx_entries_fingerprint'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(unique, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let db = test_db().await;
        let result = sqlx::query("INSERT INTO feeds_categories (feed_id, category_id) VALUES ('f', 'c')")
            .execute(&db.pool)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_order_covers_every_table() {
        assert_eq!(sorted(DROP_ORDER.iter().copied()), sorted(managed_tables()));
    }
}
