//! Content store, sync-state and job-queue ports for the schedule sync engine,
//! with in-memory implementations that can be snapshotted to JSON files.

mod memory;
mod snapshot;

use std::ops::{Bound, RangeBounds};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tvsched_core::{Channel, DayWindow, ListingItem, ShowRef};
use uuid::Uuid;

pub use memory::{MemoryContentStore, MemoryJobQueue, MemoryShowCatalog, MemorySyncState};
pub use snapshot::{read_json_or_default, write_json_atomic};

pub const CRATE_NAME: &str = "tvsched-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot serve this entity type at all. Callers treat this as fatal.
    #[error("storage for {entity} is not configured: {reason}")]
    Configuration { entity: &'static str, reason: String },
    #[error("{entity} cid {cid} already belongs to {existing}")]
    Conflict {
        entity: &'static str,
        cid: String,
        existing: Uuid,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Property query over channels. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelQuery {
    pub cid: Option<String>,
    pub schedule_enabled: Option<bool>,
    pub is_default: Option<bool>,
    /// Order by display weight, then name. Otherwise results are ordered by cid.
    pub order_by_weight: bool,
    pub limit: Option<usize>,
}

impl ChannelQuery {
    pub fn by_cid(cid: impl Into<String>) -> Self {
        Self {
            cid: Some(cid.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.cid.as_deref().map_or(true, |cid| channel.cid == cid)
            && self
                .schedule_enabled
                .map_or(true, |v| channel.schedule_enabled == v)
            && self.is_default.map_or(true, |v| channel.is_default == v)
    }
}

/// Property/range query over listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub cid: Option<String>,
    pub channel_id: Option<Uuid>,
    pub start_time: Option<(Bound<DateTime<Utc>>, Bound<DateTime<Utc>>)>,
    /// Sort by start time. Without it results are ordered by cid.
    pub sort: Option<SortDirection>,
}

impl ListingQuery {
    pub fn by_cid(cid: impl Into<String>) -> Self {
        Self {
            cid: Some(cid.into()),
            ..Default::default()
        }
    }

    /// Listings of one channel starting inside a day window.
    pub fn in_window(channel_id: Uuid, window: DayWindow) -> Self {
        Self {
            channel_id: Some(channel_id),
            start_time: Some((Bound::Included(window.start), Bound::Excluded(window.end))),
            sort: Some(SortDirection::Ascending),
            ..Default::default()
        }
    }

    /// Listings starting at or before `cutoff`, oldest first.
    pub fn started_by(cutoff: DateTime<Utc>) -> Self {
        Self {
            start_time: Some((Bound::Unbounded, Bound::Included(cutoff))),
            sort: Some(SortDirection::Ascending),
            ..Default::default()
        }
    }

    pub fn matches(&self, item: &ListingItem) -> bool {
        self.cid.as_deref().map_or(true, |cid| item.cid == cid)
            && self.channel_id.map_or(true, |id| item.channel_id == id)
            && self
                .start_time
                .as_ref()
                .map_or(true, |range| range.contains(&item.start_time))
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<Channel>, StoreError>;

    async fn load_channel(&self, id: Uuid) -> Result<Option<Channel>, StoreError>;

    /// Inserts or replaces by `id`.
    async fn save_channel(&self, channel: &Channel) -> Result<(), StoreError>;

    async fn query_listings(&self, query: &ListingQuery) -> Result<Vec<ListingItem>, StoreError>;

    /// Loads the listings that still exist among `ids`.
    async fn load_listings(&self, ids: &[Uuid]) -> Result<Vec<ListingItem>, StoreError>;

    /// Inserts or replaces by `id`.
    async fn save_listing(&self, item: &ListingItem) -> Result<(), StoreError>;

    /// Deletes the given listings and returns how many existed.
    async fn delete_listings(&self, ids: &[Uuid]) -> Result<usize, StoreError>;

    /// Persists buffered writes, if the backend buffers any.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Process-wide key/value timestamps.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Deferred deletion queue. Each item is one batch of listing ids.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, batch: Vec<Uuid>) -> Result<(), StoreError>;

    async fn dequeue(&self) -> Result<Option<Vec<Uuid>>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// External show catalog keyed by the feed's program external id.
#[async_trait]
pub trait ShowCatalog: Send + Sync {
    async fn find_by_program_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ShowRef>, StoreError>;
}
