use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use tvsched_storage::SyncStateStore;

use crate::error::{SyncError, SyncResult};

pub const LAST_PRUNE_KEY: &str = "tvsched.last_prune";
pub const LAST_DAY_UPDATE_KEY: &str = "tvsched.last_day_update";
pub const LAST_FULL_UPDATE_KEY: &str = "tvsched.last_full_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJob {
    Prune,
    DayUpdate,
    FullUpdate,
}

impl SyncJob {
    pub const ALL: [SyncJob; 3] = [SyncJob::Prune, SyncJob::DayUpdate, SyncJob::FullUpdate];

    /// Gap between scheduled runs under the default cron expressions.
    pub fn expected_interval(self) -> Duration {
        match self {
            Self::Prune | Self::DayUpdate => Duration::days(1),
            Self::FullUpdate => Duration::weeks(1),
        }
    }

    pub fn state_key(self) -> &'static str {
        match self {
            Self::Prune => LAST_PRUNE_KEY,
            Self::DayUpdate => LAST_DAY_UPDATE_KEY,
            Self::FullUpdate => LAST_FULL_UPDATE_KEY,
        }
    }
}

/// 00:00 UTC of the day before `now`.
pub fn start_of_yesterday(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    today
        .pred_opt()
        .unwrap_or(today)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Last-run timestamps per job. Nothing here enforces a schedule; callers
/// use [`SyncStateTracker::is_due`] to decide.
#[derive(Clone)]
pub struct SyncStateTracker {
    store: Arc<dyn SyncStateStore>,
}

impl SyncStateTracker {
    pub fn new(store: Arc<dyn SyncStateStore>) -> Self {
        Self { store }
    }

    pub async fn last_run(&self, job: SyncJob) -> SyncResult<DateTime<Utc>> {
        self.last_run_as_of(job, Utc::now()).await
    }

    pub async fn last_run_as_of(&self, job: SyncJob, now: DateTime<Utc>) -> SyncResult<DateTime<Utc>> {
        let stored = self
            .store
            .get(job.state_key())
            .await
            .map_err(|err| SyncError::storage("read sync state", err))?;
        Ok(stored.unwrap_or_else(|| start_of_yesterday(now)))
    }

    pub async fn record_run(&self, job: SyncJob, at: DateTime<Utc>) -> SyncResult<()> {
        self.store
            .set(job.state_key(), at)
            .await
            .map_err(|err| SyncError::storage("write sync state", err))
    }

    pub async fn is_due(&self, job: SyncJob, interval: Duration, now: DateTime<Utc>) -> SyncResult<bool> {
        Ok(now - self.last_run_as_of(job, now).await? >= interval)
    }

    pub async fn last_prune_time(&self) -> SyncResult<DateTime<Utc>> {
        self.last_run(SyncJob::Prune).await
    }

    pub async fn last_day_update(&self) -> SyncResult<DateTime<Utc>> {
        self.last_run(SyncJob::DayUpdate).await
    }

    pub async fn last_full_update(&self) -> SyncResult<DateTime<Utc>> {
        self.last_run(SyncJob::FullUpdate).await
    }
}
