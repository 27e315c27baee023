use std::collections::HashSet;

use sqlx::{Sqlite, Transaction};

use super::schema::Database;
use super::types::{CommitMode, SyncError};
use crate::sync::convert::EntryRecord;
use crate::sync::{ConversionError, EntityKind, Record, Rejection, WriteOp};

// ============================================================================
// Statements
// ============================================================================

// Simple entities are upserted rather than `INSERT OR REPLACE`d: REPLACE
// deletes the old row first, which fires ON DELETE CASCADE on its children.
// Required columns are overwritten; optional ones keep the stored value when
// the incoming record leaves them unspecified. A feed title is overwritten
// only when the record carries one (the trailing flag).

const UPSERT_FILE: &str = r#"
    INSERT INTO files (url, mime, retries, created)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(url) DO UPDATE SET
        mime = COALESCE(excluded.mime, files.mime),
        retries = COALESCE(excluded.retries, files.retries)
"#;

const UPSERT_FEED: &str = r#"
    INSERT INTO feeds (id, title, sort_id, updated, website, velocity, state, favicon)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        title = CASE WHEN ? THEN excluded.title ELSE feeds.title END,
        sort_id = COALESCE(excluded.sort_id, feeds.sort_id),
        updated = COALESCE(excluded.updated, feeds.updated),
        website = COALESCE(excluded.website, feeds.website),
        velocity = COALESCE(excluded.velocity, feeds.velocity),
        state = COALESCE(excluded.state, feeds.state),
        favicon = COALESCE(excluded.favicon, feeds.favicon)
"#;

const UPSERT_CATEGORY: &str = r#"
    INSERT INTO categories (id, label)
    VALUES (?, ?)
    ON CONFLICT(id) DO UPDATE SET
        label = COALESCE(excluded.label, categories.label)
"#;

const UPSERT_TAG: &str = r#"
    INSERT INTO tags (id, label)
    VALUES (?, ?)
    ON CONFLICT(id) DO UPDATE SET
        label = COALESCE(excluded.label, tags.label)
"#;

const UPSERT_ENTRY: &str = r#"
    INSERT INTO entries (
        id, title, author, content, content_direction, summary, summary_direction,
        crawled, recrawled, published, updated, visual_url, unread, keywords,
        engagement, engagement_rate, origin_id, fingerprint, origin_stream_id,
        origin_title, origin_feed_id, enclosure_mimes
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        author = COALESCE(excluded.author, entries.author),
        content = COALESCE(excluded.content, entries.content),
        content_direction = COALESCE(excluded.content_direction, entries.content_direction),
        summary = COALESCE(excluded.summary, entries.summary),
        summary_direction = COALESCE(excluded.summary_direction, entries.summary_direction),
        crawled = excluded.crawled,
        recrawled = COALESCE(excluded.recrawled, entries.recrawled),
        published = excluded.published,
        updated = COALESCE(excluded.updated, entries.updated),
        visual_url = COALESCE(excluded.visual_url, entries.visual_url),
        unread = excluded.unread,
        keywords = COALESCE(excluded.keywords, entries.keywords),
        engagement = COALESCE(excluded.engagement, entries.engagement),
        engagement_rate = COALESCE(excluded.engagement_rate, entries.engagement_rate),
        origin_id = excluded.origin_id,
        fingerprint = excluded.fingerprint,
        origin_stream_id = excluded.origin_stream_id,
        origin_title = COALESCE(excluded.origin_title, entries.origin_title),
        origin_feed_id = excluded.origin_feed_id,
        enclosure_mimes = COALESCE(excluded.enclosure_mimes, entries.enclosure_mimes)
"#;

const FINGERPRINT_OWNER: &str = "SELECT id FROM entries WHERE fingerprint = ? AND id <> ?";

const INSERT_FEED_CATEGORY: &str =
    "INSERT OR IGNORE INTO feeds_categories (feed_id, category_id) VALUES (?, ?)";

const INSERT_ENTRY_TAG: &str =
    "INSERT OR IGNORE INTO entries_tags (entry_id, tag_id) VALUES (?, ?)";

// ============================================================================
// Batch Applier
// ============================================================================

/// Result of applying one operation list.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub commits: usize,
    /// Entries skipped because another stored entry owns their fingerprint.
    pub skipped: Vec<Rejection>,
    pub skipped_entry_tags: usize,
    skipped_entries: HashSet<String>,
}

impl Database {
    /// Apply an ordered operation list.
    ///
    /// In [`CommitMode::Atomic`] the whole list is one transaction. In
    /// [`CommitMode::Boundaries`] the transaction is committed after every
    /// operation flagged as a commit boundary; since the list is in
    /// dependency order, whatever is visible at a boundary is referentially
    /// consistent.
    ///
    /// An entry whose fingerprint already belongs to a different stored
    /// entry is skipped together with its tag links and reported in
    /// [`Applied::skipped`]; the rest of the list is still written.
    ///
    /// On failure the open transaction is rolled back and the error names
    /// the kind and identity of the failing record.
    pub(crate) async fn apply_ops(
        &self,
        ops: &[WriteOp],
        mode: CommitMode,
    ) -> Result<Applied, SyncError> {
        let mut applied = Applied::default();
        if ops.is_empty() {
            return Ok(applied);
        }

        let write_time = chrono::Utc::now().timestamp_millis();
        let mut pending = 0;
        let mut tx = self.pool.begin().await.map_err(SyncError::from_sqlx)?;

        for op in ops {
            match apply_op(&mut tx, op, write_time, &mut applied).await {
                Ok(true) => pending += 1,
                Ok(false) => {}
                Err(e) => {
                    let err = SyncError::from_write(e, op.kind(), op.identity());
                    tracing::warn!(
                        kind = %op.kind(),
                        identity = %op.identity(),
                        error = %err,
                        rolled_back = pending,
                        "Write failed, rolling back"
                    );
                    if let Err(rollback) = tx.rollback().await {
                        tracing::warn!(error = %rollback, "Rollback failed");
                    }
                    return Err(err);
                }
            }

            if mode == CommitMode::Boundaries && op.commit_boundary && pending > 0 {
                tx.commit().await.map_err(SyncError::from_sqlx)?;
                applied.commits += 1;
                tracing::debug!(
                    kind = %op.kind(),
                    identity = %op.identity(),
                    writes = pending,
                    "Committed at boundary"
                );
                pending = 0;
                tx = self.pool.begin().await.map_err(SyncError::from_sqlx)?;
            }
        }

        if pending > 0 {
            tx.commit().await.map_err(SyncError::from_sqlx)?;
            applied.commits += 1;
        }
        Ok(applied)
    }
}

/// Writes one operation unless it has to be skipped. Returns whether a
/// statement was issued.
async fn apply_op(
    tx: &mut Transaction<'_, Sqlite>,
    op: &WriteOp,
    write_time: i64,
    applied: &mut Applied,
) -> Result<bool, sqlx::Error> {
    match &op.record {
        Record::Entry(r) => {
            if let Some(stored_id) = fingerprint_owner(tx, r).await? {
                tracing::warn!(
                    entry = %r.id,
                    fingerprint = %r.fingerprint,
                    stored = %stored_id,
                    "Fingerprint already stored for another entry, skipping"
                );
                applied.skipped_entries.insert(r.id.clone());
                applied.skipped.push(Rejection {
                    kind: EntityKind::Entry,
                    identity: r.id.clone(),
                    reason: ConversionError::FingerprintTaken {
                        fingerprint: r.fingerprint.clone(),
                        stored_id,
                    },
                });
                return Ok(false);
            }
        }
        Record::EntryTag(r) if applied.skipped_entries.contains(&r.entry_id) => {
            applied.skipped_entry_tags += 1;
            return Ok(false);
        }
        _ => {}
    }

    execute_op(tx, op, write_time).await?;
    Ok(true)
}

/// Id of a different stored entry holding `entry`'s fingerprint.
async fn fingerprint_owner(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &EntryRecord,
) -> Result<Option<String>, sqlx::Error> {
    let owner: Option<(String,)> = sqlx::query_as(FINGERPRINT_OWNER)
        .bind(&entry.fingerprint)
        .bind(&entry.id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(owner.map(|(id,)| id))
}

async fn execute_op(
    tx: &mut Transaction<'_, Sqlite>,
    op: &WriteOp,
    write_time: i64,
) -> Result<(), sqlx::Error> {
    let query = match &op.record {
        Record::File(r) => sqlx::query(UPSERT_FILE)
            .bind(&r.url)
            .bind(&r.mime)
            .bind(r.retries)
            .bind(r.created.unwrap_or(write_time)),
        Record::Feed(r) => sqlx::query(UPSERT_FEED)
            .bind(&r.id)
            .bind(r.title.as_deref().unwrap_or(&r.id))
            .bind(&r.sort_id)
            .bind(r.updated)
            .bind(&r.website)
            .bind(r.velocity)
            .bind(r.state.map(|s| s.as_str()))
            .bind(&r.favicon)
            .bind(r.title.is_some()),
        Record::Category(r) => sqlx::query(UPSERT_CATEGORY).bind(&r.id).bind(&r.label),
        Record::FeedCategory(r) => sqlx::query(INSERT_FEED_CATEGORY)
            .bind(&r.feed_id)
            .bind(&r.category_id),
        Record::Entry(r) => sqlx::query(UPSERT_ENTRY)
            .bind(&r.id)
            .bind(&r.title)
            .bind(&r.author)
            .bind(&r.content)
            .bind(r.content_direction.map(|d| d.as_str()))
            .bind(&r.summary)
            .bind(r.summary_direction.map(|d| d.as_str()))
            .bind(r.crawled)
            .bind(r.recrawled)
            .bind(r.published)
            .bind(r.updated)
            .bind(&r.visual_url)
            .bind(r.unread)
            .bind(&r.keywords)
            .bind(r.engagement)
            .bind(r.engagement_rate)
            .bind(&r.origin_id)
            .bind(&r.fingerprint)
            .bind(&r.origin_stream_id)
            .bind(&r.origin_title)
            .bind(&r.origin_feed_id)
            .bind(&r.enclosure_mimes),
        Record::Tag(r) => sqlx::query(UPSERT_TAG).bind(&r.id).bind(&r.label),
        Record::EntryTag(r) => sqlx::query(INSERT_ENTRY_TAG)
            .bind(&r.entry_id)
            .bind(&r.tag_id),
    };

    query.execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::storage::{CommitMode, Database, SyncError};
    use crate::sync::convert::{entry_tag, feed_category, EntryRecord, FeedRecord, TagRecord};
    use crate::sync::{ConversionError, EntityKind, Record, WriteOp};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn op(record: Record, commit_boundary: bool) -> WriteOp {
        WriteOp {
            record,
            commit_boundary,
        }
    }

    fn feed(id: &str) -> Record {
        titled_feed(id, Some(format!("Feed {id}")))
    }

    fn titled_feed(id: &str, title: Option<String>) -> Record {
        Record::Feed(FeedRecord {
            id: id.to_string(),
            title,
            website: None,
            velocity: None,
            state: None,
            favicon: None,
            sort_id: None,
            updated: None,
        })
    }

    fn entry(id: &str, fingerprint: &str) -> Record {
        Record::Entry(Box::new(EntryRecord {
            id: id.to_string(),
            title: format!("Entry {id}"),
            author: None,
            content: None,
            content_direction: None,
            summary: None,
            summary_direction: None,
            crawled: 1,
            recrawled: None,
            published: 1,
            updated: None,
            visual_url: None,
            unread: true,
            keywords: None,
            engagement: None,
            engagement_rate: None,
            origin_id: format!("o-{id}"),
            fingerprint: fingerprint.to_string(),
            origin_stream_id: "feed/F1".to_string(),
            origin_title: None,
            origin_feed_id: "F1".to_string(),
            enclosure_mimes: None,
        }))
    }

    fn tag(id: &str) -> Record {
        Record::Tag(TagRecord {
            id: id.to_string(),
            label: None,
        })
    }

    async fn count(db: &Database, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&db.pool)
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_empty_ops_commit_nothing() {
        let db = test_db().await;
        assert_eq!(db.apply_ops(&[], CommitMode::Atomic).await.unwrap().commits, 0);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_constraint_violation() {
        let db = test_db().await;
        let ops = vec![
            op(feed("F1"), false),
            op(Record::FeedCategory(feed_category("F1", "missing")), true),
        ];

        let err = db.apply_ops(&ops, CommitMode::Atomic).await.unwrap_err();
        match err {
            SyncError::ConstraintViolation { kind, identity, .. } => {
                assert_eq!(kind, EntityKind::FeedCategory);
                assert_eq!(identity, "F1 -> missing");
            }
            other => panic!("expected constraint violation, got {other:?}"),
        }

        // Atomic mode rolled the feed back too
        assert_eq!(count(&db, "feeds").await, 0);
    }

    #[tokio::test]
    async fn test_boundaries_keep_committed_prefix() {
        let db = test_db().await;
        let ops = vec![
            op(feed("F1"), false),
            op(tag("T1"), true),
            op(Record::EntryTag(entry_tag("missing", "T1")), true),
        ];

        let err = db
            .apply_ops(&ops, CommitMode::Boundaries)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConstraintViolation { .. }));
        assert_eq!(count(&db, "feeds").await, 1);
        assert_eq!(count(&db, "tags").await, 1);
    }

    #[tokio::test]
    async fn test_commit_counts_per_mode() {
        let db = test_db().await;
        let ops = vec![
            op(feed("F1"), false),
            op(tag("T1"), true),
            op(tag("T2"), false),
        ];
        assert_eq!(db.apply_ops(&ops, CommitMode::Atomic).await.unwrap().commits, 1);
        assert_eq!(
            db.apply_ops(&ops, CommitMode::Boundaries)
                .await
                .unwrap()
                .commits,
            2
        );

        // Boundary on the final op does not leave an empty trailing commit
        let ops = vec![op(feed("F1"), false), op(tag("T1"), true)];
        assert_eq!(
            db.apply_ops(&ops, CommitMode::Boundaries)
                .await
                .unwrap()
                .commits,
            1
        );
    }

    #[tokio::test]
    async fn test_relation_duplicate_is_silent() {
        let db = test_db().await;
        let ops = vec![
            op(feed("F1"), false),
            op(Record::Category(crate::sync::convert::CategoryRecord {
                id: "C1".to_string(),
                label: None,
            }), false),
            op(Record::FeedCategory(feed_category("F1", "C1")), false),
            op(Record::FeedCategory(feed_category("F1", "C1")), true),
        ];
        db.apply_ops(&ops, CommitMode::Atomic).await.unwrap();
        assert_eq!(count(&db, "feeds_categories").await, 1);
    }

    #[tokio::test]
    async fn test_untitled_feed_keeps_stored_title() {
        let db = test_db().await;
        db.apply_ops(&[op(feed("F1"), false)], CommitMode::Atomic)
            .await
            .unwrap();

        let untitled = vec![
            op(titled_feed("F1", None), false),
            op(titled_feed("F2", None), false),
        ];
        db.apply_ops(&untitled, CommitMode::Atomic).await.unwrap();

        let titles: Vec<(String, String)> =
            sqlx::query_as("SELECT id, title FROM feeds ORDER BY id")
                .fetch_all(&db.pool)
                .await
                .unwrap();
        assert_eq!(
            titles,
            vec![
                ("F1".to_string(), "Feed F1".to_string()),
                ("F2".to_string(), "F2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_taken_fingerprint_skips_entry_and_its_tags() {
        let db = test_db().await;
        let stored = entry("E1", "shared");
        db.apply_ops(
            &[op(feed("F1"), false), op(stored, false)],
            CommitMode::Atomic,
        )
        .await
        .unwrap();

        let ops = vec![
            op(feed("F1"), false),
            op(entry("E2", "shared"), false),
            op(entry("E3", "fp-E3"), false),
            op(tag("T1"), false),
            op(Record::EntryTag(entry_tag("E2", "T1")), false),
            op(Record::EntryTag(entry_tag("E3", "T1")), true),
        ];
        let applied = db.apply_ops(&ops, CommitMode::Boundaries).await.unwrap();

        assert_eq!(applied.commits, 1);
        assert_eq!(applied.skipped.len(), 1);
        assert_eq!(applied.skipped[0].identity, "E2");
        assert_eq!(
            applied.skipped[0].reason,
            ConversionError::FingerprintTaken {
                fingerprint: "shared".to_string(),
                stored_id: "E1".to_string(),
            }
        );
        assert_eq!(applied.skipped_entry_tags, 1);
        assert_eq!(count(&db, "entries").await, 2);
        assert_eq!(count(&db, "entries_tags").await, 1);
    }

    #[tokio::test]
    async fn test_entry_may_keep_its_own_fingerprint() {
        let db = test_db().await;
        let ops = vec![op(feed("F1"), false), op(entry("E1", "fp"), false)];
        db.apply_ops(&ops, CommitMode::Atomic).await.unwrap();

        let applied = db.apply_ops(&ops, CommitMode::Atomic).await.unwrap();
        assert!(applied.skipped.is_empty());
        assert_eq!(count(&db, "entries").await, 1);
    }
}
