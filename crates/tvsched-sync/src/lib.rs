//! Schedule feed reconciliation.
//!
//! [`ListingSynchronizer::sync_date`] is the unit of work: for one calendar
//! date it upserts every channel and listing the feed reports, then removes
//! stored listings of that channel/day that the feed no longer carries.
//! [`ListingSynchronizer::update_from_date`] walks forward until the feed runs
//! dry, and [`Pruner`] queues aged-out listings for deferred deletion.
//!
//! Work is strictly sequential. Reconciling a channel/day while another writer
//! touches the same window could delete a listing whose upsert has not landed.

mod channels;
mod config;
mod crawl;
mod error;
mod jobs;
mod listings;
mod pruner;
mod state;

use tracing::error;
use uuid::Uuid;

pub use channels::{
    load_channel_display_settings, ChannelDisplay, ChannelDisplaySettings, ChannelSynchronizer,
    ChannelUpdateReport,
};
pub use config::{InvalidPeriod, RetentionPeriod, SyncConfig};
pub use crawl::CrawlSummary;
pub use error::{SyncError, SyncResult};
pub use jobs::{
    build_scheduler, FullUpdateReport, PruneRunReport, RefreshOutcome, ScheduleJobs, StatusReport,
};
pub use listings::{DaySyncReport, FeedMatch, ListingContext, ListingSynchronizer};
pub use pruner::{DrainReport, PruneReport, PruneWorker, Pruner, PRUNE_BATCH_SIZE};
pub use state::{
    start_of_yesterday, SyncJob, SyncStateTracker, LAST_DAY_UPDATE_KEY, LAST_FULL_UPDATE_KEY,
    LAST_PRUNE_KEY,
};

pub const CRATE_NAME: &str = "tvsched-sync";

/// Takes the first record of a cid lookup, logging when the cid is not unique.
pub(crate) fn first_match<T>(
    entity: &'static str,
    cid: &str,
    found: Vec<T>,
    id_of: impl Fn(&T) -> Uuid,
) -> Option<T> {
    if found.len() > 1 {
        let ids = found
            .iter()
            .map(|record| id_of(record).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        error!(entity, cid, ids = %ids, "multiple records share one cid, using the first");
    }
    found.into_iter().next()
}
