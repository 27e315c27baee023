use serde::Deserialize;
use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::sync::{EntityKind, Rejection};

// ============================================================================
// Error Types
// ============================================================================

/// Failures surfaced by schema management and materialization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A source object could not be converted (only surfaced in strict mode;
    /// otherwise listed in [`MaterializeReport::rejected`]).
    #[error(transparent)]
    Conversion(#[from] Rejection),

    /// A write broke a referential or uniqueness constraint. The batch was
    /// rolled back to its last committed boundary.
    #[error("constraint violation writing {kind} {identity:?}: {message}")]
    ConstraintViolation {
        kind: EntityKind,
        identity: String,
        message: String,
    },

    /// The store could not be reached or is locked. Retrying the whole batch
    /// is safe because every write is idempotent per identity.
    #[error("store unavailable: {0}")]
    BackendUnavailable(#[source] sqlx::Error),

    /// The store rejected a statement for a structural reason (e.g. the
    /// schema is missing).
    #[error("schema error: {0}")]
    Schema(String),

    /// Another materialization holds the write gate.
    #[error("another materialization is already running")]
    Busy,
}

impl SyncError {
    /// Classify a sqlx error raised outside any specific record write.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if !is_lock_message(db_err.message()) => {
                SyncError::Schema(db_err.message().to_owned())
            }
            other => SyncError::BackendUnavailable(other),
        }
    }

    /// Classify a sqlx error raised while writing one record.
    pub(crate) fn from_write(err: sqlx::Error, kind: EntityKind, identity: String) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    return SyncError::ConstraintViolation {
                        kind,
                        identity,
                        message: db_err.message().to_owned(),
                    };
                }
                _ => {}
            }
        }
        Self::from_sqlx(err)
    }

    /// Whether retrying the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::BackendUnavailable(_) | SyncError::Busy)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all mean "try again later".
fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Settings
// ============================================================================

/// How a batch is split into transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// The whole batch is one transaction.
    #[default]
    Atomic,
    /// Commit after every commit-boundary hint, bounding lock duration.
    Boundaries,
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome of one materialization. Counts are writes issued per kind after
/// deduplication, not rows changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub files: usize,
    pub feeds: usize,
    pub categories: usize,
    pub feed_categories: usize,
    pub entries: usize,
    pub tags: usize,
    pub entry_tags: usize,
    /// Transactions committed.
    pub commits: usize,
    /// Source objects dropped by conversion, or entries skipped because
    /// another stored entry already owns their fingerprint.
    pub rejected: Vec<Rejection>,
}

impl MaterializeReport {
    pub fn writes(&self) -> usize {
        self.files
            + self.feeds
            + self.categories
            + self.feed_categories
            + self.entries
            + self.tags
            + self.entry_tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ConversionError;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Busy.is_retryable());
        assert!(SyncError::BackendUnavailable(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!SyncError::Schema("no such table: feeds".to_string()).is_retryable());

        let rejection = Rejection {
            kind: EntityKind::Entry,
            identity: "E1".to_string(),
            reason: ConversionError::MalformedStreamId {
                stream_id: "nofeed".to_string(),
            },
        };
        let err = SyncError::from(rejection);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("\"E1\""));
        assert!(err.to_string().contains("\"nofeed\""));
    }

    #[test]
    fn test_lock_messages_are_unavailable() {
        assert!(is_lock_message("database is locked"));
        assert!(is_lock_message("SQLITE_BUSY: try again"));
        assert!(!is_lock_message("no such table: entries"));
    }
}
