//! Local feed store: schema management and batch application.
//!
//! [`Database`] owns the SQLite pool. Its write API
//! ([`Database::materialize_subscriptions`], [`Database::materialize_entries`],
//! [`Database::materialize`]) runs the [`crate::sync`] pipeline and applies
//! the resulting operations; [`Database::create_schema`] and
//! [`Database::reset_schema`] manage the tables, indexes and views.

mod apply;
mod materialize;
mod schema;
mod types;

pub use materialize::SyncBatch;
pub use schema::{managed_indexes, managed_tables, managed_views, Database, StoreOptions};
pub use types::{CommitMode, MaterializeReport, SyncError};
