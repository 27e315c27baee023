//! Dependency-ordered batch building.
//!
//! A [`BatchBuilder`] accumulates converted records from subscriptions and
//! entries, then [`BatchBuilder::build`] deduplicates each kind and emits
//! one operation list in foreign-key order:
//!
//! ```text
//! files -> feeds -> categories -> feeds_categories
//!       -> entries -> tags -> entries_tags
//! ```
//!
//! The last operation of each relation group carries a commit-boundary
//! hint: committing right after it never exposes a dangling reference.

use std::collections::HashSet;

use super::convert::{
    convert_category, convert_entry, convert_origin, convert_subscription, convert_tag, entry_files,
    entry_tag, feed_category, feed_files, CategoryRecord, ConversionError, EntryRecord,
    EntryTagRecord, FeedCategoryRecord, FeedRecord, FileRecord, Rejection, TagRecord,
};
use super::dedup::{dedup, dedup_by_key};
use super::EntityKind;
use crate::model::{Entry, Subscription};

// ============================================================================
// Operations
// ============================================================================

/// What the store does when the row's identity already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Overwrite the stored row (simple entities).
    Replace,
    /// Keep the stored row; the write is a silent no-op (relations).
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    File(FileRecord),
    Feed(FeedRecord),
    Category(CategoryRecord),
    FeedCategory(FeedCategoryRecord),
    Entry(Box<EntryRecord>),
    Tag(TagRecord),
    EntryTag(EntryTagRecord),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::File(_) => EntityKind::File,
            Record::Feed(_) => EntityKind::Feed,
            Record::Category(_) => EntityKind::Category,
            Record::FeedCategory(_) => EntityKind::FeedCategory,
            Record::Entry(_) => EntityKind::Entry,
            Record::Tag(_) => EntityKind::Tag,
            Record::EntryTag(_) => EntityKind::EntryTag,
        }
    }

    /// Printable identity, used for logging and error context.
    pub fn identity(&self) -> String {
        match self {
            Record::File(r) => r.url.clone(),
            Record::Feed(r) => r.id.clone(),
            Record::Category(r) => r.id.clone(),
            Record::FeedCategory(r) => format!("{} -> {}", r.feed_id, r.category_id),
            Record::Entry(r) => r.id.clone(),
            Record::Tag(r) => r.id.clone(),
            Record::EntryTag(r) => format!("{} -> {}", r.entry_id, r.tag_id),
        }
    }
}

/// One write against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub record: Record,
    /// Safe point to commit or yield after this write.
    pub commit_boundary: bool,
}

impl WriteOp {
    fn new(record: Record) -> Self {
        Self {
            record,
            commit_boundary: false,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.record.kind()
    }

    pub fn identity(&self) -> String {
        self.record.identity()
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        if self.kind().is_relation() {
            ConflictPolicy::Ignore
        } else {
            ConflictPolicy::Replace
        }
    }
}

/// The ordered output of one build.
#[derive(Debug, Default)]
pub struct Batch {
    pub ops: Vec<WriteOp>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Number of operations of one kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.ops.iter().filter(|op| op.kind() == kind).count()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Records contributed by one top-level source object.
///
/// A unit is converted completely before anything is queued, so a failure
/// anywhere inside it rejects the whole object and none of its relations.
#[derive(Default)]
struct Unit {
    files: Vec<FileRecord>,
    feeds: Vec<FeedRecord>,
    categories: Vec<CategoryRecord>,
    feed_categories: Vec<FeedCategoryRecord>,
    entries: Vec<EntryRecord>,
    tags: Vec<TagRecord>,
    entry_tags: Vec<EntryTagRecord>,
}

#[derive(Debug, Default)]
pub struct BatchBuilder {
    files: Vec<FileRecord>,
    feeds: Vec<FeedRecord>,
    categories: Vec<CategoryRecord>,
    feed_categories: Vec<FeedCategoryRecord>,
    entries: Vec<EntryRecord>,
    tags: Vec<TagRecord>,
    entry_tags: Vec<EntryTagRecord>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a subscription, its favicon, its categories and their links.
    pub fn add_subscription(&mut self, subscription: &Subscription) -> Result<(), Rejection> {
        let reject = |reason: ConversionError| Rejection {
            kind: EntityKind::Feed,
            identity: subscription.feed.id.clone(),
            reason,
        };

        let feed = convert_subscription(subscription).map_err(reject)?;
        let mut unit = Unit {
            files: feed_files(&subscription.feed),
            ..Unit::default()
        };
        for category in &subscription.categories {
            let record = convert_category(category).map_err(reject)?;
            unit.feed_categories.push(feed_category(&feed.id, &record.id));
            unit.categories.push(record);
        }
        unit.feeds.push(feed);

        self.absorb(unit);
        Ok(())
    }

    /// Queues an entry together with the feed synthesized from its origin,
    /// its files, tags and categories.
    ///
    /// The synthesized feed only has id and (maybe) title; when a fuller
    /// record for the same feed is already queued, first-seen-wins keeps the
    /// fuller one.
    pub fn add_entry(&mut self, entry: &Entry) -> Result<(), Rejection> {
        let reject = |reason: ConversionError| Rejection {
            kind: EntityKind::Entry,
            identity: entry.id.clone(),
            reason,
        };

        let feed = convert_origin(&entry.origin).map_err(reject)?;
        let record = convert_entry(entry).map_err(reject)?;

        let mut unit = Unit {
            files: entry_files(entry),
            ..Unit::default()
        };
        for category in &entry.categories {
            let category = convert_category(category).map_err(reject)?;
            unit.feed_categories.push(feed_category(&feed.id, &category.id));
            unit.categories.push(category);
        }
        for tag in &entry.tags {
            let tag = convert_tag(tag).map_err(reject)?;
            unit.entry_tags.push(entry_tag(&record.id, &tag.id));
            unit.tags.push(tag);
        }
        unit.feeds.push(feed);
        unit.entries.push(record);

        self.absorb(unit);
        Ok(())
    }

    fn absorb(&mut self, unit: Unit) {
        self.files.extend(unit.files);
        self.feeds.extend(unit.feeds);
        self.categories.extend(unit.categories);
        self.feed_categories.extend(unit.feed_categories);
        self.entries.extend(unit.entries);
        self.tags.extend(unit.tags);
        self.entry_tags.extend(unit.entry_tags);
    }

    /// Deduplicates every kind and emits the dependency-ordered operations.
    pub fn build(self) -> Batch {
        let files = dedup(self.files);
        let feeds = dedup(self.feeds);
        let categories = dedup(self.categories);
        let feed_categories = dedup(self.feed_categories);

        // A fingerprint identifies one version of an article's content, and
        // the store keeps it unique: the first entry per fingerprint stays.
        let by_id = dedup(self.entries);
        let entries = dedup_by_key(by_id.iter().cloned(), |e| e.fingerprint.clone());
        let kept: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let dropped = by_id.len() - entries.len();
        let tags = dedup(self.tags);
        let entry_tags = dedup(
            self.entry_tags
                .into_iter()
                .filter(|rel| kept.contains(rel.entry_id.as_str())),
        );

        tracing::debug!(
            files = files.len(),
            feeds = feeds.len(),
            categories = categories.len(),
            feed_categories = feed_categories.len(),
            entries = entries.len(),
            fingerprint_duplicates = dropped,
            tags = tags.len(),
            entry_tags = entry_tags.len(),
            "Built write batch"
        );

        let mut ops = Vec::new();
        push_group(&mut ops, files.into_iter().map(Record::File), false);
        push_group(&mut ops, feeds.into_iter().map(Record::Feed), false);
        push_group(&mut ops, categories.into_iter().map(Record::Category), false);
        push_group(
            &mut ops,
            feed_categories.into_iter().map(Record::FeedCategory),
            true,
        );
        push_group(
            &mut ops,
            entries.into_iter().map(|e| Record::Entry(Box::new(e))),
            false,
        );
        push_group(&mut ops, tags.into_iter().map(Record::Tag), false);
        push_group(&mut ops, entry_tags.into_iter().map(Record::EntryTag), true);

        Batch { ops }
    }
}

/// Appends one dependency group; with `boundary`, its last operation is
/// flagged as a commit boundary.
fn push_group(ops: &mut Vec<WriteOp>, records: impl Iterator<Item = Record>, boundary: bool) {
    let start = ops.len();
    ops.extend(records.map(WriteOp::new));
    if boundary && ops.len() > start {
        if let Some(last) = ops.last_mut() {
            last.commit_boundary = true;
        }
    }
}
