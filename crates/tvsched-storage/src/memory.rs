use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use tvsched_core::{Channel, ListingItem, ShowRef};
use uuid::Uuid;

use crate::snapshot::{read_json_or_default, write_json_atomic};
use crate::{
    ChannelQuery, ContentStore, JobQueue, ListingQuery, ShowCatalog, SortDirection, StoreError,
    SyncStateStore,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContentSnapshot {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    listings: Vec<ListingItem>,
}

#[derive(Debug, Default)]
struct ContentTables {
    channels: HashMap<Uuid, Channel>,
    listings: HashMap<Uuid, ListingItem>,
}

/// In-memory content store. When opened from a path, `flush` writes a JSON
/// snapshot of every channel and listing.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    path: Option<PathBuf>,
    tables: RwLock<ContentTables>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot: ContentSnapshot = read_json_or_default(&path).await?;
        debug!(
            path = %path.display(),
            channels = snapshot.channels.len(),
            listings = snapshot.listings.len(),
            "loaded content snapshot"
        );
        let tables = ContentTables {
            channels: snapshot.channels.into_iter().map(|c| (c.id, c)).collect(),
            listings: snapshot.listings.into_iter().map(|l| (l.id, l)).collect(),
        };
        Ok(Self {
            path: Some(path),
            tables: RwLock::new(tables),
        })
    }

    pub async fn channel_count(&self) -> usize {
        self.tables.read().await.channels.len()
    }

    pub async fn listing_count(&self) -> usize {
        self.tables.read().await.listings.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<Channel>, StoreError> {
        let tables = self.tables.read().await;
        let mut found: Vec<Channel> = tables
            .channels
            .values()
            .filter(|c| query.matches(c))
            .cloned()
            .collect();
        if query.order_by_weight {
            found.sort_by(|a, b| {
                (a.weight, &a.name, &a.cid).cmp(&(b.weight, &b.name, &b.cid))
            });
        } else {
            found.sort_by(|a, b| a.cid.cmp(&b.cid));
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn load_channel(&self, id: Uuid) -> Result<Option<Channel>, StoreError> {
        Ok(self.tables.read().await.channels.get(&id).cloned())
    }

    async fn save_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(other) = tables
            .channels
            .values()
            .find(|c| c.cid == channel.cid && c.id != channel.id)
        {
            return Err(StoreError::Conflict {
                entity: "channel",
                cid: channel.cid.clone(),
                existing: other.id,
            });
        }
        tables.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn query_listings(&self, query: &ListingQuery) -> Result<Vec<ListingItem>, StoreError> {
        let tables = self.tables.read().await;
        let mut found: Vec<ListingItem> = tables
            .listings
            .values()
            .filter(|l| query.matches(l))
            .cloned()
            .collect();
        match query.sort {
            Some(SortDirection::Ascending) => {
                found.sort_by(|a, b| (a.start_time, &a.cid).cmp(&(b.start_time, &b.cid)))
            }
            Some(SortDirection::Descending) => {
                found.sort_by(|a, b| (b.start_time, &b.cid).cmp(&(a.start_time, &a.cid)))
            }
            None => found.sort_by(|a, b| a.cid.cmp(&b.cid)),
        }
        Ok(found)
    }

    async fn load_listings(&self, ids: &[Uuid]) -> Result<Vec<ListingItem>, StoreError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.listings.get(id).cloned())
            .collect())
    }

    async fn save_listing(&self, item: &ListingItem) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(other) = tables
            .listings
            .values()
            .find(|l| l.cid == item.cid && l.id != item.id)
        {
            return Err(StoreError::Conflict {
                entity: "listing",
                cid: item.cid.clone(),
                existing: other.id,
            });
        }
        tables.listings.insert(item.id, item.clone());
        Ok(())
    }

    async fn delete_listings(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(ids
            .iter()
            .filter(|id| tables.listings.remove(*id).is_some())
            .count())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = {
            let tables = self.tables.read().await;
            let mut channels: Vec<Channel> = tables.channels.values().cloned().collect();
            channels.sort_by(|a, b| a.cid.cmp(&b.cid));
            let mut listings: Vec<ListingItem> = tables.listings.values().cloned().collect();
            listings.sort_by(|a, b| (a.start_time, &a.cid).cmp(&(b.start_time, &b.cid)));
            ContentSnapshot { channels, listings }
        };
        write_json_atomic(path, &snapshot).await?;
        debug!(
            path = %path.display(),
            listings = snapshot.listings.len(),
            "content snapshot written"
        );
        Ok(())
    }
}

/// Key/value timestamps, written through to disk on every `set` when opened from a path.
#[derive(Debug, Default)]
pub struct MemorySyncState {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemorySyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = read_json_or_default(&path).await?;
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncState {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.values.lock().await.get(key).copied())
    }

    async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value);
        if let Some(path) = &self.path {
            write_json_atomic(path, &*values).await?;
        }
        Ok(())
    }
}

/// FIFO of id batches, written through to disk on every change when opened from a path.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    path: Option<PathBuf>,
    batches: Mutex<VecDeque<Vec<Uuid>>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let batches = read_json_or_default(&path).await?;
        Ok(Self {
            path: Some(path),
            batches: Mutex::new(batches),
        })
    }

    pub async fn snapshot(&self) -> Vec<Vec<Uuid>> {
        self.batches.lock().await.iter().cloned().collect()
    }

    async fn persist(&self, batches: &VecDeque<Vec<Uuid>>) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, batches).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, batch: Vec<Uuid>) -> Result<(), StoreError> {
        let mut batches = self.batches.lock().await;
        batches.push_back(batch);
        self.persist(&batches).await
    }

    async fn dequeue(&self) -> Result<Option<Vec<Uuid>>, StoreError> {
        let mut batches = self.batches.lock().await;
        let batch = batches.pop_front();
        if batch.is_some() {
            self.persist(&batches).await?;
        }
        Ok(batch)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.batches.lock().await.len())
    }
}

/// Show catalog backed by a map of program external id to show.
#[derive(Debug, Default, Clone)]
pub struct MemoryShowCatalog {
    shows: HashMap<String, ShowRef>,
}

impl MemoryShowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_show(mut self, program_external_id: impl Into<String>, show: ShowRef) -> Self {
        self.shows.insert(program_external_id.into(), show);
        self
    }

    /// Loads a JSON object mapping program external ids to shows.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let shows: HashMap<String, ShowRef> = read_json_or_default(path.as_ref()).await?;
        Ok(Self { shows })
    }
}

#[async_trait]
impl ShowCatalog for MemoryShowCatalog {
    async fn find_by_program_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ShowRef>, StoreError> {
        Ok(self.shows.get(external_id).cloned())
    }
}
