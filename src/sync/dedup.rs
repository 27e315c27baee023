//! Identity-based deduplication.
//!
//! Records are compared by identity only. The first record seen for an
//! identity is kept and later ones are discarded, even when they carry more
//! attributes; nothing is merged field by field.

use std::collections::HashSet;
use std::hash::Hash;

use super::convert::{
    CategoryRecord, EntryRecord, EntryTagRecord, FeedCategoryRecord, FeedRecord, FileRecord,
    TagRecord,
};

/// Keeps the first item per key, preserving first-seen order.
pub fn dedup_by_key<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}

/// A record with a store identity.
pub trait Identified {
    type Key: Eq + Hash;

    fn identity(&self) -> Self::Key;
}

/// [`dedup_by_key`] on each record's [`Identified::identity`].
pub fn dedup<T: Identified>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    dedup_by_key(items, T::identity)
}

impl Identified for FileRecord {
    type Key = String;

    fn identity(&self) -> String {
        self.url.clone()
    }
}

impl Identified for FeedRecord {
    type Key = String;

    fn identity(&self) -> String {
        self.id.clone()
    }
}

impl Identified for CategoryRecord {
    type Key = String;

    fn identity(&self) -> String {
        self.id.clone()
    }
}

impl Identified for TagRecord {
    type Key = String;

    fn identity(&self) -> String {
        self.id.clone()
    }
}

impl Identified for EntryRecord {
    type Key = String;

    fn identity(&self) -> String {
        self.id.clone()
    }
}

impl Identified for FeedCategoryRecord {
    type Key = (String, String);

    fn identity(&self) -> (String, String) {
        (self.feed_id.clone(), self.category_id.clone())
    }
}

impl Identified for EntryTagRecord {
    type Key = (String, String);

    fn identity(&self) -> (String, String) {
        (self.entry_id.clone(), self.tag_id.clone())
    }
}
