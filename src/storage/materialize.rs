use super::schema::Database;
use super::types::{MaterializeReport, SyncError};
use crate::model::{Entry, Subscription};
use crate::sync::{Batch, BatchBuilder, EntityKind, Rejection};

/// One set of objects fetched together in a sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    pub subscriptions: Vec<Subscription>,
    pub entries: Vec<Entry>,
}

impl Database {
    // ========================================================================
    // Write API
    // ========================================================================

    /// Materialize a batch of subscriptions with their categories.
    pub async fn materialize_subscriptions(
        &self,
        subscriptions: &[Subscription],
    ) -> Result<MaterializeReport, SyncError> {
        let _gate = self.write_gate.lock().await;
        self.materialize_locked(subscriptions, &[]).await
    }

    /// Materialize a batch of entries.
    ///
    /// Each entry's origin feed is synthesized and written before the entry,
    /// so entries whose feed is not yet in the store never fail on the
    /// foreign key.
    pub async fn materialize_entries(
        &self,
        entries: &[Entry],
    ) -> Result<MaterializeReport, SyncError> {
        let _gate = self.write_gate.lock().await;
        self.materialize_locked(&[], entries).await
    }

    /// Materialize subscriptions and entries as one operation list.
    ///
    /// Subscriptions are queued first, so their full feed records win over
    /// feeds synthesized from entry origins.
    pub async fn materialize(&self, batch: &SyncBatch) -> Result<MaterializeReport, SyncError> {
        let _gate = self.write_gate.lock().await;
        self.materialize_locked(&batch.subscriptions, &batch.entries)
            .await
    }

    /// Like [`Database::materialize`], but returns [`SyncError::Busy`]
    /// instead of waiting when another materialization is running.
    pub async fn try_materialize(
        &self,
        batch: &SyncBatch,
    ) -> Result<MaterializeReport, SyncError> {
        let _gate = self.write_gate.try_lock().map_err(|_| SyncError::Busy)?;
        self.materialize_locked(&batch.subscriptions, &batch.entries)
            .await
    }

    async fn materialize_locked(
        &self,
        subscriptions: &[Subscription],
        entries: &[Entry],
    ) -> Result<MaterializeReport, SyncError> {
        let (batch, rejected) = self.build_batch(subscriptions, entries)?;

        let mut report = MaterializeReport {
            files: batch.count(EntityKind::File),
            feeds: batch.count(EntityKind::Feed),
            categories: batch.count(EntityKind::Category),
            feed_categories: batch.count(EntityKind::FeedCategory),
            entries: batch.count(EntityKind::Entry),
            tags: batch.count(EntityKind::Tag),
            entry_tags: batch.count(EntityKind::EntryTag),
            commits: 0,
            rejected,
        };

        let applied = self
            .apply_ops(&batch.ops, self.options.commit_mode)
            .await?;
        report.commits = applied.commits;
        report.entries -= applied.skipped.len();
        report.entry_tags -= applied.skipped_entry_tags;
        report.rejected.extend(applied.skipped);

        tracing::info!(
            subscriptions = subscriptions.len(),
            entries = entries.len(),
            writes = report.writes(),
            commits = report.commits,
            rejected = report.rejected.len(),
            "Materialized batch"
        );
        Ok(report)
    }

    /// Convert every source object, collecting rejections.
    ///
    /// In strict mode the first rejection aborts the batch before any write.
    fn build_batch(
        &self,
        subscriptions: &[Subscription],
        entries: &[Entry],
    ) -> Result<(Batch, Vec<Rejection>), SyncError> {
        let mut builder = BatchBuilder::new();
        let mut rejected = Vec::new();

        for subscription in subscriptions {
            if let Err(rejection) = builder.add_subscription(subscription) {
                self.record_rejection(rejection, &mut rejected)?;
            }
        }
        for entry in entries {
            if let Err(rejection) = builder.add_entry(entry) {
                self.record_rejection(rejection, &mut rejected)?;
            }
        }

        Ok((builder.build(), rejected))
    }

    fn record_rejection(
        &self,
        rejection: Rejection,
        rejected: &mut Vec<Rejection>,
    ) -> Result<(), SyncError> {
        if self.options.strict_conversion {
            return Err(rejection.into());
        }
        tracing::warn!(
            kind = %rejection.kind,
            identity = %rejection.identity,
            reason = %rejection.reason,
            "Rejected record"
        );
        rejected.push(rejection);
        Ok(())
    }
}
