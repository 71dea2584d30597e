use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use tvsched_storage::{ContentStore, JobQueue, ListingQuery};
use uuid::Uuid;

use crate::config::RetentionPeriod;
use crate::error::{SyncError, SyncResult};

pub const PRUNE_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub cutoff: DateTime<Utc>,
    pub matched: usize,
    pub batches_queued: usize,
    pub batches_failed: usize,
}

/// Queues listings that started at or before the retention cutoff. Deletion
/// happens later in [`PruneWorker`].
#[derive(Clone)]
pub struct Pruner {
    store: Arc<dyn ContentStore>,
    queue: Arc<dyn JobQueue>,
}

impl Pruner {
    pub fn new(store: Arc<dyn ContentStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn queue_stale_for_deletion(&self, max_age: RetentionPeriod) -> SyncResult<PruneReport> {
        self.queue_stale_as_of(Utc::now(), max_age).await
    }

    pub async fn queue_stale_as_of(
        &self,
        now: DateTime<Utc>,
        max_age: RetentionPeriod,
    ) -> SyncResult<PruneReport> {
        let cutoff = max_age.cutoff(now);
        let mut report = PruneReport {
            cutoff,
            matched: 0,
            batches_queued: 0,
            batches_failed: 0,
        };

        let stale = match self
            .store
            .query_listings(&ListingQuery::started_by(cutoff))
            .await
        {
            Ok(stale) => stale,
            Err(err) if err.is_configuration() => return Err(SyncError::Configuration(err)),
            Err(err) => {
                error!(%cutoff, error = %err, "stale listing query failed");
                return Ok(report);
            }
        };
        report.matched = stale.len();

        for chunk in stale.chunks(PRUNE_BATCH_SIZE) {
            let ids: Vec<Uuid> = chunk.iter().map(|item| item.id).collect();
            match self.queue.enqueue(ids).await {
                Ok(()) => report.batches_queued += 1,
                Err(err) if err.is_configuration() => return Err(SyncError::Configuration(err)),
                Err(err) => {
                    report.batches_failed += 1;
                    warn!(size = chunk.len(), error = %err, "failed to queue prune batch");
                }
            }
        }
        info!(
            %cutoff,
            max_age = %max_age,
            matched = report.matched,
            batches = report.batches_queued,
            "queued stale listings"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub batches: usize,
    pub deleted: usize,
    pub failed_batches: usize,
}

/// Consumer side of the prune queue.
#[derive(Clone)]
pub struct PruneWorker {
    store: Arc<dyn ContentStore>,
    queue: Arc<dyn JobQueue>,
}

impl PruneWorker {
    pub fn new(store: Arc<dyn ContentStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Deletes whichever listings of `ids` still exist.
    pub async fn process_batch(&self, ids: &[Uuid]) -> SyncResult<usize> {
        let existing: Vec<Uuid> = self
            .store
            .load_listings(ids)
            .await
            .map_err(|err| SyncError::storage("load prune batch", err))?
            .into_iter()
            .map(|item| item.id)
            .collect();
        if existing.is_empty() {
            return Ok(0);
        }
        self.store
            .delete_listings(&existing)
            .await
            .map_err(|err| SyncError::storage("delete prune batch", err))
    }

    /// Processes queued batches until the queue is empty. A failed batch is
    /// logged and dropped.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(batch) = self
            .queue
            .dequeue()
            .await
            .map_err(|err| SyncError::storage("dequeue prune batch", err))?
        {
            report.batches += 1;
            match self.process_batch(&batch).await {
                Ok(deleted) => report.deleted += deleted,
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(size = batch.len(), error = %err, "prune batch failed");
                }
            }
        }
        if report.batches > 0 {
            info!(
                batches = report.batches,
                deleted = report.deleted,
                failed = report.failed_batches,
                "prune queue drained"
            );
        }
        Ok(report)
    }
}
