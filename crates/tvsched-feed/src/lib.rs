//! Remote schedule feed contract plus fixture-directory and in-memory feeds.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use tvsched_core::{ChannelListings, FeedChannel, FeedImage, FeedListing};

pub const CRATE_NAME: &str = "tvsched-feed";

pub const WIDE_RATIO: &str = "16:9";
pub const PREFERRED_SHOW_PROFILE: &str = "Banner-L2";
pub const FALLBACK_SHOW_PROFILE: &str = "Banner-L1";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    #[error("malformed feed data in {origin}: {source}")]
    Malformed {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_channels(&self) -> Result<Vec<FeedChannel>, FeedError>;

    /// Per-channel listing batches for one calendar date. An empty result
    /// means the feed has nothing for that date.
    async fn fetch_listings(&self, date: NaiveDate) -> Result<Vec<ChannelListings>, FeedError>;
}

/// Picks a show image: the first 16:9 `Banner-L2`, else the last 16:9 `Banner-L1`.
pub fn show_image_uri(images: &[FeedImage]) -> Option<&str> {
    let wide_with = |profile: &'static str| {
        move |image: &&FeedImage| {
            image.ratio.as_deref() == Some(WIDE_RATIO)
                && image.external_profile.as_deref() == Some(profile)
        }
    };
    images
        .iter()
        .find(wide_with(PREFERRED_SHOW_PROFILE))
        .or_else(|| images.iter().rev().find(wide_with(FALLBACK_SHOW_PROFILE)))
        .map(|image| image.image.as_str())
}

/// First 16:9 episode image, regardless of profile.
pub fn episode_image_uri(images: &[FeedImage]) -> Option<&str> {
    images
        .iter()
        .find(|image| image.ratio.as_deref() == Some(WIDE_RATIO))
        .map(|image| image.image.as_str())
}

/// Locates a listing by cid across all batches of a date.
pub fn find_listing<'a>(
    batches: &'a [ChannelListings],
    cid: &str,
) -> Option<(&'a FeedChannel, &'a FeedListing)> {
    batches.iter().find_map(|batch| {
        batch
            .listings
            .iter()
            .find(|listing| listing.cid == cid)
            .map(|listing| (&batch.channel, listing))
    })
}

/// Feed read from a directory of captured responses:
///
/// ```text
/// <root>/channels.json            [FeedChannel]
/// <root>/listings/YYYY-MM-DD.json [ChannelListings]
/// ```
///
/// A date without a listings file is past the feed horizon and yields no batches.
/// Channel entries that do not decode are logged and left out of the result.
#[derive(Debug, Clone)]
pub struct FixtureFeedSource {
    root: PathBuf,
}

impl FixtureFeedSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn listings_path(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join("listings")
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FeedError> {
        let data = match fs::read_to_string(path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(FeedError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| FeedError::Malformed {
                origin: path.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl FeedSource for FixtureFeedSource {
    async fn fetch_channels(&self) -> Result<Vec<FeedChannel>, FeedError> {
        let path = self.root.join("channels.json");
        match Self::read_json(&path).await? {
            Some(channels) => Ok(channels),
            None => Err(FeedError::Unavailable(format!(
                "no channel list at {}",
                path.display()
            ))),
        }
    }

    async fn fetch_listings(&self, date: NaiveDate) -> Result<Vec<ChannelListings>, FeedError> {
        let path = self.listings_path(date);
        let entries: Vec<serde_json::Value> = Self::read_json(&path).await?.unwrap_or_default();
        let mut batches = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<ChannelListings>(entry) {
                Ok(batch) => batches.push(batch),
                Err(err) => warn!(
                    %date,
                    index,
                    path = %path.display(),
                    error = %err,
                    "skipping undecodable channel entry"
                ),
            }
        }
        debug!(%date, batches = batches.len(), path = %path.display(), "read fixture listings");
        Ok(batches)
    }
}

/// Scriptable in-memory feed. Counts listing fetches and can be told to fail
/// for particular dates.
#[derive(Debug, Default)]
pub struct MemoryFeedSource {
    channels: RwLock<Vec<FeedChannel>>,
    listings: RwLock<HashMap<NaiveDate, Vec<ChannelListings>>>,
    failing_dates: RwLock<HashSet<NaiveDate>>,
    listing_fetches: AtomicUsize,
}

impl MemoryFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_channels(&self, channels: Vec<FeedChannel>) {
        *self.channels.write().await = channels;
    }

    pub async fn set_listings(&self, date: NaiveDate, batches: Vec<ChannelListings>) {
        self.listings.write().await.insert(date, batches);
    }

    pub async fn fail_on(&self, date: NaiveDate) {
        self.failing_dates.write().await.insert(date);
    }

    pub fn listing_fetches(&self) -> usize {
        self.listing_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for MemoryFeedSource {
    async fn fetch_channels(&self) -> Result<Vec<FeedChannel>, FeedError> {
        Ok(self.channels.read().await.clone())
    }

    async fn fetch_listings(&self, date: NaiveDate) -> Result<Vec<ChannelListings>, FeedError> {
        self.listing_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_dates.read().await.contains(&date) {
            return Err(FeedError::Unavailable(format!("listings for {date}")));
        }
        Ok(self
            .listings
            .read()
            .await
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn image(uri: &str, ratio: &str, profile: Option<&str>) -> FeedImage {
        FeedImage {
            image: uri.to_string(),
            ratio: Some(ratio.to_string()),
            external_profile: profile.map(ToString::to_string),
        }
    }

    fn listing(cid: &str) -> FeedListing {
        FeedListing {
            cid: cid.to_string(),
            title: format!("Show {cid}"),
            episode_title: None,
            description: None,
            episode_description: None,
            start_time: "0600".to_string(),
            minutes: 30,
            program_external_id: None,
            show_external_id: None,
            airing_type: None,
            program_id: None,
            images: Vec::new(),
            episode_images: Vec::new(),
        }
    }

    fn batch(cid: &str, listings: Vec<FeedListing>) -> ChannelListings {
        ChannelListings::new(
            FeedChannel {
                cid: cid.to_string(),
                full_name: format!("Channel {cid}"),
                short_name: None,
                external_id: None,
                timezone: Some("America/New_York".to_string()),
            },
            listings,
        )
    }

    #[test]
    fn show_image_prefers_banner_l2() {
        let images = vec![
            image("l1.jpg", "16:9", Some("Banner-L1")),
            image("square.jpg", "1:1", Some("Banner-L2")),
            image("l2.jpg", "16:9", Some("Banner-L2")),
        ];
        assert_eq!(show_image_uri(&images), Some("l2.jpg"));
    }

    #[test]
    fn show_image_falls_back_to_banner_l1() {
        let images = vec![
            image("other.jpg", "16:9", Some("Poster")),
            image("l1-a.jpg", "16:9", Some("Banner-L1")),
            image("l1-b.jpg", "16:9", Some("Banner-L1")),
        ];
        assert_eq!(show_image_uri(&images), Some("l1-b.jpg"));
        assert_eq!(show_image_uri(&[image("x.jpg", "4:3", Some("Banner-L1"))]), None);
    }

    #[test]
    fn episode_image_match_at_first_position_counts() {
        let images = vec![
            image("first.jpg", "16:9", None),
            image("second.jpg", "16:9", Some("Banner-L2")),
        ];
        assert_eq!(episode_image_uri(&images), Some("first.jpg"));
        assert_eq!(episode_image_uri(&[image("x.jpg", "2:3", None)]), None);
    }

    #[test]
    fn find_listing_searches_every_batch_including_first_entry() {
        let batches = vec![
            batch("ch-1", vec![listing("A1"), listing("A2")]),
            batch("ch-2", vec![listing("B1")]),
        ];
        let (channel, found) = find_listing(&batches, "A1").expect("first entry");
        assert_eq!(channel.cid, "ch-1");
        assert_eq!(found.cid, "A1");
        assert_eq!(find_listing(&batches, "B1").unwrap().0.cid, "ch-2");
        assert!(find_listing(&batches, "Z9").is_none());
    }

    #[tokio::test]
    async fn fixture_feed_reads_listing_files_by_date() {
        let dir = tempdir().expect("tempdir");
        let feed = FixtureFeedSource::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        std::fs::create_dir_all(dir.path().join("listings")).unwrap();
        let batches = vec![batch("ch-1", vec![listing("A1")])];
        std::fs::write(
            feed.listings_path(date),
            serde_json::to_vec(&batches).unwrap(),
        )
        .unwrap();

        assert_eq!(feed.fetch_listings(date).await.unwrap(), batches);
        let next = date.succ_opt().unwrap();
        assert!(feed.fetch_listings(next).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fixture_feed_isolates_bad_records() {
        let dir = tempdir().expect("tempdir");
        let feed = FixtureFeedSource::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        std::fs::create_dir_all(dir.path().join("listings")).unwrap();
        std::fs::write(
            feed.listings_path(date),
            r#"[
                {"cid": "C1", "full_name": "One", "timezone": "UTC", "listings": [
                    {"cid": "G1", "title": "Good", "start_time": "0600", "minutes": 30},
                    {"cid": "B1", "title": "Bad", "start_time": "0630"}
                ]},
                {"full_name": "No cid", "listings": []},
                {"cid": "C2", "full_name": "Two", "timezone": "UTC", "listings": [
                    {"cid": "G2", "title": "Good", "start_time": "0700", "minutes": 30}
                ]}
            ]"#,
        )
        .unwrap();

        let batches = feed.fetch_listings(date).await.unwrap();
        let cids: Vec<_> = batches.iter().map(|b| b.channel.cid.as_str()).collect();
        assert_eq!(cids, vec!["C1", "C2"]);
        assert_eq!(batches[0].listings.len(), 1);
        assert_eq!(batches[0].rejected[0].cid.as_deref(), Some("B1"));
        assert_eq!(batches[1].listings[0].cid, "G2");
        assert!(batches[1].rejected.is_empty());
    }

    #[tokio::test]
    async fn fixture_feed_reports_malformed_and_missing_channels() {
        let dir = tempdir().expect("tempdir");
        let feed = FixtureFeedSource::new(dir.path());
        assert!(matches!(
            feed.fetch_channels().await,
            Err(FeedError::Unavailable(_))
        ));

        std::fs::write(dir.path().join("channels.json"), b"[{\"cid\": 1}]").unwrap();
        assert!(matches!(
            feed.fetch_channels().await,
            Err(FeedError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn memory_feed_counts_fetches_and_fails_on_request() {
        let feed = MemoryFeedSource::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        feed.set_listings(date, vec![batch("ch-1", vec![listing("A1")])])
            .await;
        assert_eq!(feed.fetch_listings(date).await.unwrap().len(), 1);

        feed.fail_on(date).await;
        assert!(feed.fetch_listings(date).await.is_err());
        assert_eq!(feed.listing_fetches(), 2);
    }
}
