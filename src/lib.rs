//! Feed-data synchronization and local-store materialization.
//!
//! Takes batches of typed objects fetched from a cloud RSS aggregation
//! service ([`model`]) and writes them into a local SQLite store as a
//! deduplicated, foreign-key-safe sequence of operations.
//!
//! ```ignore
//! use feedmirror::storage::Database;
//!
//! let db = Database::open("feeds.db").await?;
//! let report = db.materialize_entries(&entries).await?;
//! println!("{} writes in {} commits", report.writes(), report.commits);
//! ```

pub mod config;
pub mod model;
pub mod storage;
pub mod sync;
