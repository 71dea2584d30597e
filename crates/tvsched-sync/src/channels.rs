use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, warn};
use tvsched_core::{Channel, FeedChannel};
use tvsched_feed::FeedSource;
use tvsched_storage::{ChannelQuery, ContentStore};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::first_match;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelUpdateReport {
    pub fetched: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Local-only schedule display settings, keyed by channel cid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelDisplaySettings {
    #[serde(default)]
    pub channels: Vec<ChannelDisplay>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDisplay {
    pub cid: String,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub weight: i32,
}

pub async fn load_channel_display_settings(path: &Path) -> Result<ChannelDisplaySettings> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Upserts channel records from the feed. Channels are never deleted.
#[derive(Clone)]
pub struct ChannelSynchronizer {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn ContentStore>,
}

impl ChannelSynchronizer {
    pub fn new(feed: Arc<dyn FeedSource>, store: Arc<dyn ContentStore>) -> Self {
        Self { feed, store }
    }

    pub async fn find_by_cid(&self, cid: &str) -> SyncResult<Option<Channel>> {
        let found = self
            .store
            .query_channels(&ChannelQuery::by_cid(cid))
            .await
            .map_err(|err| SyncError::storage("query channel by cid", err))?;
        Ok(first_match("channel", cid, found, |c| c.id))
    }

    pub async fn channel(&self, id: Uuid) -> SyncResult<Option<Channel>> {
        self.store
            .load_channel(id)
            .await
            .map_err(|err| SyncError::storage("load channel", err))
    }

    /// Feed data owns name, short name, external id and timezone. Schedule
    /// flags and weight are local and survive every update.
    pub async fn add_or_update(&self, feed: &FeedChannel) -> SyncResult<Channel> {
        let mut channel = match self.find_by_cid(&feed.cid).await? {
            Some(channel) => channel,
            None => {
                debug!(cid = %feed.cid, "creating channel");
                Channel::new(feed.cid.clone())
            }
        };
        channel.name = feed.full_name.clone();
        channel.short_name = feed.short_name.clone();
        channel.external_id = feed.external_id.clone();
        channel.timezone = feed.timezone.clone();

        self.store
            .save_channel(&channel)
            .await
            .map_err(|err| SyncError::storage("save channel", err))?;
        Ok(channel)
    }

    pub async fn update(&self) -> SyncResult<ChannelUpdateReport> {
        let mut report = ChannelUpdateReport::default();
        let channels = match self.feed.fetch_channels().await {
            Ok(channels) => channels,
            Err(source) => {
                let err = SyncError::RemoteFetch {
                    unit: "channel list".to_string(),
                    source,
                };
                error!(error = %err, "channel update skipped");
                return Ok(report);
            }
        };
        report.fetched = channels.len();

        for feed_channel in &channels {
            match self.add_or_update(feed_channel).await {
                Ok(_) => report.updated += 1,
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    report.failed += 1;
                    warn!(cid = %feed_channel.cid, error = %err, "channel update failed");
                }
            }
        }
        info!(
            fetched = report.fetched,
            updated = report.updated,
            failed = report.failed,
            "channel update finished"
        );
        Ok(report)
    }

    /// Schedule-enabled channels in display order.
    pub async fn schedule_channels(&self) -> SyncResult<Vec<Channel>> {
        let query = ChannelQuery {
            schedule_enabled: Some(true),
            order_by_weight: true,
            ..Default::default()
        };
        self.store
            .query_channels(&query)
            .await
            .map_err(|err| SyncError::storage("query schedule channels", err))
    }

    pub async fn default_schedule_channel(&self) -> SyncResult<Option<Channel>> {
        let query = ChannelQuery {
            schedule_enabled: Some(true),
            is_default: Some(true),
            order_by_weight: true,
            limit: Some(1),
            ..Default::default()
        };
        let found = self
            .store
            .query_channels(&query)
            .await
            .map_err(|err| SyncError::storage("query default channel", err))?;
        Ok(found.into_iter().next())
    }

    /// Returns how many stored channels were changed. Unknown cids are skipped.
    pub async fn apply_display_settings(
        &self,
        settings: &ChannelDisplaySettings,
    ) -> SyncResult<usize> {
        let mut applied = 0;
        for entry in &settings.channels {
            let Some(mut channel) = self.find_by_cid(&entry.cid).await? else {
                debug!(cid = %entry.cid, "no stored channel for display settings");
                continue;
            };
            if channel.schedule_enabled == entry.schedule_enabled
                && channel.is_default == entry.is_default
                && channel.weight == entry.weight
            {
                continue;
            }
            channel.schedule_enabled = entry.schedule_enabled;
            channel.is_default = entry.is_default;
            channel.weight = entry.weight;
            self.store
                .save_channel(&channel)
                .await
                .map_err(|err| SyncError::storage("save channel display settings", err))?;
            applied += 1;
        }
        Ok(applied)
    }
}
