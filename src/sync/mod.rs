//! Turns remote batches into ordered, deduplicated store writes.
//!
//! The pipeline runs leaf-first:
//!
//! - [`convert`] maps each domain object to a flat, typed record
//! - [`dedup`] collapses records sharing an identity (first seen wins)
//! - [`batch`] orders the survivors so every parent row is written before
//!   the rows that reference it
//!
//! Nothing in this module touches the store; [`crate::storage`] applies the
//! resulting [`WriteOp`] list.

pub mod batch;
pub mod convert;
pub mod dedup;

use std::fmt;

pub use batch::{Batch, BatchBuilder, ConflictPolicy, Record, WriteOp};
pub use convert::{ConversionError, Rejection};
pub use dedup::{dedup, dedup_by_key, Identified};

/// Every kind of row the pipeline writes, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    File,
    Feed,
    Category,
    FeedCategory,
    Entry,
    Tag,
    EntryTag,
}

impl EntityKind {
    /// Write order of the groups inside one batch.
    pub const WRITE_ORDER: [EntityKind; 7] = [
        EntityKind::File,
        EntityKind::Feed,
        EntityKind::Category,
        EntityKind::FeedCategory,
        EntityKind::Entry,
        EntityKind::Tag,
        EntityKind::EntryTag,
    ];

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::File => "files",
            EntityKind::Feed => "feeds",
            EntityKind::Category => "categories",
            EntityKind::FeedCategory => "feeds_categories",
            EntityKind::Entry => "entries",
            EntityKind::Tag => "tags",
            EntityKind::EntryTag => "entries_tags",
        }
    }

    /// Relation kinds link two parent rows and carry a composite identity.
    pub fn is_relation(self) -> bool {
        matches!(self, EntityKind::FeedCategory | EntityKind::EntryTag)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::File => "file",
            EntityKind::Feed => "feed",
            EntityKind::Category => "category",
            EntityKind::FeedCategory => "feed-category",
            EntityKind::Entry => "entry",
            EntityKind::Tag => "tag",
            EntityKind::EntryTag => "entry-tag",
        };
        f.write_str(name)
    }
}
