use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use tvsched_core::ListingItem;
use tvsched_feed::{FeedSource, FixtureFeedSource};
use tvsched_storage::{
    ContentStore, JobQueue, MemoryContentStore, MemoryJobQueue, MemoryShowCatalog,
    MemorySyncState, ShowCatalog, SyncStateStore,
};

use crate::channels::{load_channel_display_settings, ChannelUpdateReport};
use crate::config::{RetentionPeriod, SyncConfig};
use crate::crawl::CrawlSummary;
use crate::listings::{DaySyncReport, ListingSynchronizer};
use crate::pruner::{DrainReport, PruneReport, PruneWorker, Pruner};
use crate::state::{SyncJob, SyncStateTracker};

#[derive(Debug, Clone, Serialize)]
pub struct FullUpdateReport {
    pub channels: ChannelUpdateReport,
    pub crawl: CrawlSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneRunReport {
    pub queued: PruneReport,
    pub drained: DrainReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    NotStored,
    GoneUpstream(ListingItem),
    Refreshed(ListingItem),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub last_prune: DateTime<Utc>,
    pub last_day_update: DateTime<Utc>,
    pub last_full_update: DateTime<Utc>,
    pub pending_prune_batches: usize,
    /// Jobs whose last run is older than their expected interval.
    pub overdue: Vec<SyncJob>,
}

/// The runnable sync jobs. A single run lock keeps jobs from overlapping,
/// whether they come from the CLI or the cron scheduler.
pub struct ScheduleJobs {
    store: Arc<dyn ContentStore>,
    queue: Arc<dyn JobQueue>,
    listings: ListingSynchronizer,
    pruner: Pruner,
    worker: PruneWorker,
    state: SyncStateTracker,
    retention: RetentionPeriod,
    channels_file: Option<PathBuf>,
    run_lock: Mutex<()>,
}

impl ScheduleJobs {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn ContentStore>,
        shows: Arc<dyn ShowCatalog>,
        queue: Arc<dyn JobQueue>,
        state: Arc<dyn SyncStateStore>,
    ) -> Self {
        Self {
            listings: ListingSynchronizer::new(feed, Arc::clone(&store), shows),
            pruner: Pruner::new(Arc::clone(&store), Arc::clone(&queue)),
            worker: PruneWorker::new(Arc::clone(&store), Arc::clone(&queue)),
            state: SyncStateTracker::new(state),
            store,
            queue,
            retention: RetentionPeriod::default(),
            channels_file: None,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPeriod) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_channels_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.channels_file = Some(path.into());
        self
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let store = MemoryContentStore::open(&config.store_path)
            .await
            .with_context(|| format!("opening content store {}", config.store_path.display()))?;
        let state = MemorySyncState::open(&config.state_path)
            .await
            .with_context(|| format!("opening sync state {}", config.state_path.display()))?;
        let queue = MemoryJobQueue::open(&config.queue_path)
            .await
            .with_context(|| format!("opening prune queue {}", config.queue_path.display()))?;
        let shows = match &config.shows_file {
            Some(path) => MemoryShowCatalog::open(path)
                .await
                .with_context(|| format!("loading show catalog {}", path.display()))?,
            None => MemoryShowCatalog::new(),
        };
        let feed = FixtureFeedSource::new(config.feed_dir.clone());

        Ok(Self::new(
            Arc::new(feed),
            Arc::new(store),
            Arc::new(shows),
            Arc::new(queue),
            Arc::new(state),
        )
        .with_retention(config.prune_max_age)
        .with_channels_file(config.channels_file.clone()))
    }

    pub fn listings(&self) -> &ListingSynchronizer {
        &self.listings
    }

    pub async fn run_channel_update(&self) -> Result<ChannelUpdateReport> {
        let _guard = self.run_lock.lock().await;
        let report = self.update_channels().await?;
        self.flush().await?;
        Ok(report)
    }

    pub async fn run_day_update(&self, date: NaiveDate) -> Result<DaySyncReport> {
        let _guard = self.run_lock.lock().await;
        let report = self.listings.sync_date(date).await?;
        self.flush().await?;
        if report.fetch_failed {
            warn!(%date, "feed fetch failed, day update not recorded");
        } else {
            self.state.record_run(SyncJob::DayUpdate, Utc::now()).await?;
        }
        Ok(report)
    }

    /// Channel update followed by a forward crawl from `start`.
    pub async fn run_full_update(&self, start: NaiveDate) -> Result<FullUpdateReport> {
        let _guard = self.run_lock.lock().await;
        let channels = self.update_channels().await?;
        let crawl = self.listings.update_from_date(start).await?;
        self.flush().await?;
        self.state.record_run(SyncJob::FullUpdate, Utc::now()).await?;
        Ok(FullUpdateReport { channels, crawl })
    }

    pub async fn run_prune(&self, max_age: Option<RetentionPeriod>) -> Result<PruneRunReport> {
        let _guard = self.run_lock.lock().await;
        let queued = self
            .pruner
            .queue_stale_for_deletion(max_age.unwrap_or(self.retention))
            .await?;
        let drained = self.worker.drain().await?;
        self.flush().await?;
        self.state.record_run(SyncJob::Prune, Utc::now()).await?;
        Ok(PruneRunReport { queued, drained })
    }

    pub async fn refresh(&self, cid: &str) -> Result<RefreshOutcome> {
        let _guard = self.run_lock.lock().await;
        let Some(item) = self.listings.find_by_cid(cid).await? else {
            return Ok(RefreshOutcome::NotStored);
        };
        let outcome = match self.listings.refresh_listing_item(&item).await? {
            Some(refreshed) => RefreshOutcome::Refreshed(refreshed),
            None => RefreshOutcome::GoneUpstream(item),
        };
        self.flush().await?;
        Ok(outcome)
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let now = Utc::now();
        let mut overdue = Vec::new();
        for job in SyncJob::ALL {
            if self.state.is_due(job, job.expected_interval(), now).await? {
                overdue.push(job);
            }
        }
        Ok(StatusReport {
            last_prune: self.state.last_prune_time().await?,
            last_day_update: self.state.last_day_update().await?,
            last_full_update: self.state.last_full_update().await?,
            pending_prune_batches: self
                .queue
                .len()
                .await
                .context("reading prune queue length")?,
            overdue,
        })
    }

    async fn update_channels(&self) -> Result<ChannelUpdateReport> {
        let report = self.listings.channels().update().await?;
        if let Some(path) = &self.channels_file {
            let exists = fs::try_exists(path)
                .await
                .with_context(|| format!("checking channels file {}", path.display()))?;
            if exists {
                let settings = load_channel_display_settings(path).await?;
                let applied = self
                    .listings
                    .channels()
                    .apply_display_settings(&settings)
                    .await?;
                debug!(path = %path.display(), applied, "applied channel display settings");
            }
        }
        Ok(report)
    }

    async fn flush(&self) -> Result<()> {
        self.store.flush().await.context("flushing content store")
    }
}

/// Cron jobs for the day update, the full update and pruning, or `None`
/// when the scheduler is disabled.
pub async fn build_scheduler(
    jobs: Arc<ScheduleJobs>,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let day_jobs = Arc::clone(&jobs);
    let day = Job::new_async(config.day_update_cron.as_str(), move |_uuid, _l| {
        let jobs = Arc::clone(&day_jobs);
        Box::pin(async move {
            let today = Local::now().date_naive();
            match jobs.run_day_update(today).await {
                Ok(report) => {
                    info!(date = %report.date, updated = report.updated, "scheduled day update done")
                }
                Err(err) => error!("scheduled day update failed: {err:#}"),
            }
        })
    })
    .with_context(|| format!("creating day update job for cron {}", config.day_update_cron))?;
    sched.add(day).await.context("adding day update job")?;

    let full_jobs = Arc::clone(&jobs);
    let full = Job::new_async(config.full_update_cron.as_str(), move |_uuid, _l| {
        let jobs = Arc::clone(&full_jobs);
        Box::pin(async move {
            let today = Local::now().date_naive();
            match jobs.run_full_update(today).await {
                Ok(report) => info!(days = report.crawl.days.len(), "scheduled full update done"),
                Err(err) => error!("scheduled full update failed: {err:#}"),
            }
        })
    })
    .with_context(|| format!("creating full update job for cron {}", config.full_update_cron))?;
    sched.add(full).await.context("adding full update job")?;

    let prune_jobs = Arc::clone(&jobs);
    let prune = Job::new_async(config.prune_cron.as_str(), move |_uuid, _l| {
        let jobs = Arc::clone(&prune_jobs);
        Box::pin(async move {
            match jobs.run_prune(None).await {
                Ok(report) => info!(deleted = report.drained.deleted, "scheduled prune done"),
                Err(err) => error!("scheduled prune failed: {err:#}"),
            }
        })
    })
    .with_context(|| format!("creating prune job for cron {}", config.prune_cron))?;
    sched.add(prune).await.context("adding prune job")?;

    Ok(Some(sched))
}
