use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tvsched_core::{
    compute_day_window, compute_storage_instant, local_date_of, parse_timezone, present, Channel,
    ChannelListings, DayWindow, FeedChannel, FeedListing, ListingItem,
};
use tvsched_feed::{episode_image_uri, find_listing, show_image_uri, FeedSource};
use tvsched_storage::{ContentStore, ListingQuery, ShowCatalog};
use uuid::Uuid;

use crate::channels::ChannelSynchronizer;
use crate::error::{SyncError, SyncResult};
use crate::first_match;

/// Channel and channel-local date a feed listing is interpreted against.
#[derive(Debug, Clone)]
pub struct ListingContext {
    pub channel: Channel,
    pub timezone: Tz,
    pub date: NaiveDate,
}

impl ListingContext {
    pub fn new(channel: Channel, date: NaiveDate) -> SyncResult<Self> {
        let timezone = channel_timezone(&channel)?;
        Ok(Self {
            channel,
            timezone,
            date,
        })
    }

    /// Context for the channel-local day that contains `instant`.
    pub fn containing(channel: Channel, instant: DateTime<Utc>) -> SyncResult<Self> {
        let timezone = channel_timezone(&channel)?;
        Ok(Self {
            date: local_date_of(instant, timezone),
            channel,
            timezone,
        })
    }

    pub fn window(&self) -> DayWindow {
        compute_day_window(self.date, self.timezone)
    }
}

fn channel_timezone(channel: &Channel) -> SyncResult<Tz> {
    let missing = |reason: String| SyncError::MissingTimezone {
        cid: channel.cid.clone(),
        reason,
    };
    let name = channel
        .timezone_name()
        .ok_or_else(|| missing("no timezone set".to_string()))?;
    parse_timezone(name).map_err(|err| missing(err.to_string()))
}

/// Outcome of reconciling one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySyncReport {
    pub date: NaiveDate,
    pub fetch_failed: bool,
    pub batches: usize,
    pub channels_skipped: usize,
    pub listings_upserted: usize,
    pub listings_failed: usize,
    pub listings_removed: usize,
    /// At least one listing was processed, successfully or not.
    pub updated: bool,
}

impl DaySyncReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            fetch_failed: false,
            batches: 0,
            channels_skipped: 0,
            listings_upserted: 0,
            listings_failed: 0,
            listings_removed: 0,
            updated: false,
        }
    }
}

/// A feed listing together with the channel batch it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedMatch {
    pub channel: FeedChannel,
    pub listing: FeedListing,
}

#[derive(Clone)]
pub struct ListingSynchronizer {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn ContentStore>,
    shows: Arc<dyn ShowCatalog>,
    channels: ChannelSynchronizer,
}

impl ListingSynchronizer {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn ContentStore>,
        shows: Arc<dyn ShowCatalog>,
    ) -> Self {
        let channels = ChannelSynchronizer::new(Arc::clone(&feed), Arc::clone(&store));
        Self {
            feed,
            store,
            shows,
            channels,
        }
    }

    pub fn channels(&self) -> &ChannelSynchronizer {
        &self.channels
    }

    pub async fn find_by_cid(&self, cid: &str) -> SyncResult<Option<ListingItem>> {
        let found = self
            .store
            .query_listings(&ListingQuery::by_cid(cid))
            .await
            .map_err(|err| SyncError::storage("query listing by cid", err))?;
        Ok(first_match("listing", cid, found, |item| item.id))
    }

    /// Creates or updates the stored listing for `listing.cid`. Optional
    /// attributes missing from the feed record keep their stored values;
    /// title and description are always rewritten.
    pub async fn add_or_update(
        &self,
        listing: &FeedListing,
        ctx: &ListingContext,
    ) -> SyncResult<ListingItem> {
        let start_time = compute_storage_instant(ctx.date, &listing.start_time, ctx.timezone)
            .map_err(|source| SyncError::InvalidTimeFormat {
                cid: listing.cid.clone(),
                source,
            })?;

        let mut item = match self.find_by_cid(&listing.cid).await? {
            Some(item) => item,
            None => ListingItem::new(listing.cid.clone(), ctx.channel.id, start_time),
        };
        item.channel_id = ctx.channel.id;
        item.title = present(&listing.episode_title)
            .unwrap_or(&listing.title)
            .to_string();
        item.show_title = listing.title.clone();
        item.description = present(&listing.episode_description)
            .or_else(|| present(&listing.description))
            .map(str::to_string);
        item.start_time = start_time;
        item.duration_minutes = listing.minutes;
        item.end_time = start_time + Duration::minutes(i64::from(listing.minutes));

        set_if_present(&mut item.program_external_id, &listing.program_external_id);
        set_if_present(&mut item.episode_external_id, &listing.show_external_id);
        set_if_present(&mut item.airing_type, &listing.airing_type);
        set_if_present(&mut item.program_id, &listing.program_id);
        if let Some(uri) = show_image_uri(&listing.images) {
            item.show_image_uri = Some(uri.to_string());
        }
        if let Some(uri) = episode_image_uri(&listing.episode_images) {
            item.episode_image_uri = Some(uri.to_string());
        }

        if let Some(external_id) = present(&listing.program_external_id) {
            match self.shows.find_by_program_external_id(external_id).await {
                Ok(Some(show)) => item.show_ref = Some(show),
                Ok(None) => {}
                Err(err) => warn!(
                    cid = %listing.cid,
                    program_external_id = external_id,
                    error = %err,
                    "show catalog lookup failed"
                ),
            }
        }

        self.store
            .save_listing(&item)
            .await
            .map_err(|err| SyncError::storage("save listing", err))?;
        Ok(item)
    }

    pub async fn update_by_date(&self, date: NaiveDate) -> SyncResult<bool> {
        Ok(self.sync_date(date).await?.updated)
    }

    pub async fn sync_date(&self, date: NaiveDate) -> SyncResult<DaySyncReport> {
        self.sync_date_inner(date)
            .instrument(info_span!("sync_date", %date))
            .await
    }

    async fn sync_date_inner(&self, date: NaiveDate) -> SyncResult<DaySyncReport> {
        let mut report = DaySyncReport::new(date);
        let batches = match self.feed.fetch_listings(date).await {
            Ok(batches) => batches,
            Err(source) => {
                let err = SyncError::RemoteFetch {
                    unit: format!("listings for {date}"),
                    source,
                };
                error!(error = %err, "listing fetch failed");
                report.fetch_failed = true;
                return Ok(report);
            }
        };
        if batches.is_empty() {
            info!("no listings found");
            return Ok(report);
        }
        report.batches = batches.len();

        // Batches repeating a channel share one observed set; a channel with
        // any skipped batch keeps its stored listings.
        let mut observed: Vec<(ListingContext, HashSet<String>)> = Vec::new();
        let mut skipped: HashSet<&str> = HashSet::new();
        for batch in &batches {
            match self.import_batch(batch, date, &mut report).await {
                Ok((ctx, seen)) => {
                    match observed
                        .iter_mut()
                        .find(|(known, _)| known.channel.id == ctx.channel.id)
                    {
                        Some((_, known)) => known.extend(seen),
                        None => observed.push((ctx, seen)),
                    }
                }
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    report.channels_skipped += 1;
                    skipped.insert(batch.channel.cid.as_str());
                    warn!(channel = %batch.channel.cid, error = %err, "skipping channel batch");
                }
            }
        }

        for (ctx, seen) in &observed {
            if skipped.contains(ctx.channel.cid.as_str()) {
                debug!(channel = %ctx.channel.cid, "partial channel import, keeping stored listings");
                continue;
            }
            report.listings_removed += self.remove_unmatched(ctx, seen).await?;
        }

        info!(
            batches = report.batches,
            skipped = report.channels_skipped,
            upserted = report.listings_upserted,
            failed = report.listings_failed,
            removed = report.listings_removed,
            "date synchronized"
        );
        Ok(report)
    }

    /// Upserts one batch and returns the cids it observed.
    async fn import_batch(
        &self,
        batch: &ChannelListings,
        date: NaiveDate,
        report: &mut DaySyncReport,
    ) -> SyncResult<(ListingContext, HashSet<String>)> {
        let channel = self.channels.add_or_update(&batch.channel).await?;
        let ctx = ListingContext::new(channel, date)?;

        // Failed upserts still count as observed so their stored copies survive.
        let mut observed = HashSet::with_capacity(batch.listings.len());
        for rejected in &batch.rejected {
            report.updated = true;
            report.listings_failed += 1;
            warn!(
                cid = rejected.cid.as_deref().unwrap_or("<none>"),
                channel = %ctx.channel.cid,
                reason = %rejected.reason,
                "undecodable listing record"
            );
            if let Some(cid) = &rejected.cid {
                observed.insert(cid.clone());
            }
        }
        for listing in &batch.listings {
            observed.insert(listing.cid.clone());
            report.updated = true;
            match self.add_or_update(listing, &ctx).await {
                Ok(_) => report.listings_upserted += 1,
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    report.listings_failed += 1;
                    warn!(
                        cid = %listing.cid,
                        channel = %ctx.channel.cid,
                        error = %err,
                        "listing upsert failed"
                    );
                }
            }
        }

        Ok((ctx, observed))
    }

    /// Deletes stored listings of the context's channel/day whose cid is not in
    /// `observed`. Store failures abandon the cleanup and report zero removals.
    pub async fn remove_unmatched(
        &self,
        ctx: &ListingContext,
        observed: &HashSet<String>,
    ) -> SyncResult<usize> {
        let window = ctx.window();
        let stored = match self
            .store
            .query_listings(&ListingQuery::in_window(ctx.channel.id, window))
            .await
        {
            Ok(stored) => stored,
            Err(err) if err.is_configuration() => return Err(SyncError::Configuration(err)),
            Err(err) => {
                warn!(
                    channel = %ctx.channel.cid,
                    date = %ctx.date,
                    error = %err,
                    "unmatched listing query failed, skipping removal"
                );
                return Ok(0);
            }
        };

        let unmatched: Vec<Uuid> = stored
            .iter()
            .filter(|item| !observed.contains(&item.cid))
            .map(|item| item.id)
            .collect();
        if unmatched.is_empty() {
            return Ok(0);
        }

        match self.store.delete_listings(&unmatched).await {
            Ok(removed) => {
                info!(
                    channel = %ctx.channel.cid,
                    date = %ctx.date,
                    removed,
                    "removed unmatched listings"
                );
                Ok(removed)
            }
            Err(err) if err.is_configuration() => Err(SyncError::Configuration(err)),
            Err(err) => {
                warn!(
                    channel = %ctx.channel.cid,
                    date = %ctx.date,
                    error = %err,
                    "unmatched listing delete failed"
                );
                Ok(0)
            }
        }
    }

    /// Point lookup of one listing in the feed for `date`.
    pub async fn get_listing(&self, date: NaiveDate, cid: &str) -> SyncResult<Option<FeedMatch>> {
        let batches = self
            .feed
            .fetch_listings(date)
            .await
            .map_err(|source| SyncError::RemoteFetch {
                unit: format!("listings for {date}"),
                source,
            })?;
        Ok(find_listing(&batches, cid).map(|(channel, listing)| FeedMatch {
            channel: channel.clone(),
            listing: listing.clone(),
        }))
    }

    /// Re-reads one stored listing from the feed day it airs on. Returns
    /// `None` when the feed no longer carries it.
    pub async fn refresh_listing_item(&self, item: &ListingItem) -> SyncResult<Option<ListingItem>> {
        let channel = self
            .channels
            .channel(item.channel_id)
            .await?
            .ok_or_else(|| SyncError::UnknownChannel {
                cid: item.cid.clone(),
                channel_id: item.channel_id,
            })?;
        let ctx = ListingContext::containing(channel, item.start_time)?;
        match self.get_listing(ctx.date, &item.cid).await? {
            Some(found) => self.add_or_update(&found.listing, &ctx).await.map(Some),
            None => {
                debug!(cid = %item.cid, date = %ctx.date, "listing not in feed");
                Ok(None)
            }
        }
    }
}

fn set_if_present(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = present(value) {
        *target = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{batch, date, feed_channel, feed_listing, utc, FlakyStore};
    use tvsched_core::{FeedImage, RejectedListing, ShowRef};
    use tvsched_feed::MemoryFeedSource;
    use tvsched_storage::MemoryShowCatalog;

    struct Harness {
        feed: Arc<MemoryFeedSource>,
        store: Arc<FlakyStore>,
        sync: ListingSynchronizer,
    }

    fn harness_with(shows: MemoryShowCatalog) -> Harness {
        let feed = Arc::new(MemoryFeedSource::new());
        let store = Arc::new(FlakyStore::new());
        let sync = ListingSynchronizer::new(feed.clone(), store.clone(), Arc::new(shows));
        Harness { feed, store, sync }
    }

    fn harness() -> Harness {
        harness_with(MemoryShowCatalog::new())
    }

    fn la() -> FeedChannel {
        feed_channel("TESTV", Some("America/Los_Angeles"))
    }

    #[tokio::test]
    async fn evening_listing_is_stored_in_utc() {
        let h = harness();
        let day = date(2024, 3, 10);
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A1", "1930", 60)])])
            .await;

        assert!(h.sync.update_by_date(day).await.unwrap());
        let item = h.sync.find_by_cid("A1").await.unwrap().unwrap();
        assert_eq!(item.start_time, utc("2024-03-11T02:30:00Z"));
        assert_eq!(item.end_time, utc("2024-03-11T03:30:00Z"));
        assert_eq!(item.duration_minutes, 60);
        let channel = h.sync.channels().find_by_cid("TESTV").await.unwrap().unwrap();
        assert_eq!(item.channel_id, channel.id);
    }

    #[tokio::test]
    async fn reconciliation_replaces_the_days_listing_set() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(
                day,
                vec![batch(
                    la(),
                    vec![
                        feed_listing("A1", "0600", 30),
                        feed_listing("A2", "0630", 30),
                        feed_listing("A3", "0700", 30),
                    ],
                )],
            )
            .await;
        h.sync.sync_date(day).await.unwrap();
        let a1 = h.sync.find_by_cid("A1").await.unwrap().unwrap();

        let mut retitled = feed_listing("A1", "0600", 30);
        retitled.title = "Morning News".to_string();
        h.feed
            .set_listings(
                day,
                vec![batch(
                    la(),
                    vec![
                        retitled,
                        feed_listing("A3", "0700", 30),
                        feed_listing("A4", "0730", 30),
                    ],
                )],
            )
            .await;
        let report = h.sync.sync_date(day).await.unwrap();

        assert_eq!(report.listings_removed, 1);
        assert_eq!(h.store.stored_cids().await, vec!["A1", "A3", "A4"]);
        let updated = h.sync.find_by_cid("A1").await.unwrap().unwrap();
        assert_eq!(updated.id, a1.id);
        assert_eq!(updated.title, "Morning News");
    }

    #[tokio::test]
    async fn removal_is_scoped_to_channel_and_day() {
        let h = harness();
        let day = date(2024, 5, 1);
        let next = date(2024, 5, 2);
        let other = feed_channel("OTHER", Some("America/New_York"));
        h.feed
            .set_listings(
                day,
                vec![
                    batch(la(), vec![feed_listing("A1", "0600", 30)]),
                    batch(other.clone(), vec![feed_listing("B1", "0600", 30)]),
                ],
            )
            .await;
        h.feed
            .set_listings(next, vec![batch(la(), vec![feed_listing("A9", "0600", 30)])])
            .await;
        h.sync.sync_date(day).await.unwrap();
        h.sync.sync_date(next).await.unwrap();

        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A2", "0600", 30)])])
            .await;
        h.sync.sync_date(day).await.unwrap();

        assert_eq!(h.store.stored_cids().await, vec!["A2", "A9", "B1"]);
    }

    #[tokio::test]
    async fn reapplying_the_same_record_is_idempotent() {
        let h = harness();
        let day = date(2024, 5, 1);
        let mut listing = feed_listing("A1", "2100", 45);
        listing.episode_title = Some("Pilot".to_string());
        listing.description = Some("Series overview".to_string());
        listing.show_external_id = Some("EP-77".to_string());
        h.feed.set_listings(day, vec![batch(la(), vec![listing])]).await;

        h.sync.sync_date(day).await.unwrap();
        let first = h.sync.find_by_cid("A1").await.unwrap().unwrap();
        h.sync.sync_date(day).await.unwrap();
        let second = h.sync.find_by_cid("A1").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(h.store.inner().listing_count().await, 1);
        assert_eq!(second.title, "Pilot");
        assert_eq!(second.show_title, "Show A1");
        assert_eq!(second.episode_external_id.as_deref(), Some("EP-77"));
    }

    #[tokio::test]
    async fn sparse_records_keep_previous_optional_values() {
        let h = harness_with(MemoryShowCatalog::new().with_show(
            "SH-1",
            ShowRef {
                id: "show-1".to_string(),
                title: Some("Nature".to_string()),
            },
        ));
        let channel = h.sync.channels().add_or_update(&la()).await.unwrap();
        let ctx = ListingContext::new(channel, date(2024, 5, 1)).unwrap();

        let mut full = feed_listing("A1", "0800", 60);
        full.episode_description = Some("Episode text".to_string());
        full.description = Some("Show text".to_string());
        full.program_external_id = Some("SH-1".to_string());
        full.airing_type = Some("New".to_string());
        full.images = vec![FeedImage {
            image: "banner.jpg".to_string(),
            ratio: Some("16:9".to_string()),
            external_profile: Some("Banner-L1".to_string()),
        }];
        let stored = h.sync.add_or_update(&full, &ctx).await.unwrap();
        assert_eq!(stored.description.as_deref(), Some("Episode text"));
        assert_eq!(stored.show_ref.as_ref().map(|s| s.id.as_str()), Some("show-1"));
        assert_eq!(stored.show_image_uri.as_deref(), Some("banner.jpg"));

        let mut sparse = feed_listing("A1", "0900", 30);
        sparse.airing_type = Some("  ".to_string());
        let updated = h.sync.add_or_update(&sparse, &ctx).await.unwrap();
        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.airing_type.as_deref(), Some("New"));
        assert_eq!(updated.description, None);
        assert_eq!(updated.show_image_uri.as_deref(), Some("banner.jpg"));
        assert_eq!(updated.start_time, utc("2024-05-01T16:00:00Z"));
        assert_eq!(updated.end_time - updated.start_time, Duration::minutes(30));
    }

    #[tokio::test]
    async fn description_follows_the_latest_record() {
        let h = harness();
        let day = date(2024, 5, 1);
        let mut listing = feed_listing("A1", "0800", 60);
        listing.description = Some("Old show text".to_string());
        h.feed.set_listings(day, vec![batch(la(), vec![listing])]).await;
        h.sync.sync_date(day).await.unwrap();

        let mut episode = feed_listing("A1", "0800", 60);
        episode.description = Some("Show text".to_string());
        episode.episode_description = Some("Episode text".to_string());
        h.feed.set_listings(day, vec![batch(la(), vec![episode])]).await;
        h.sync.sync_date(day).await.unwrap();
        let item = h.sync.find_by_cid("A1").await.unwrap().unwrap();
        assert_eq!(item.description.as_deref(), Some("Episode text"));

        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A1", "0800", 60)])])
            .await;
        h.sync.sync_date(day).await.unwrap();
        let item = h.sync.find_by_cid("A1").await.unwrap().unwrap();
        assert_eq!(item.description, None);
    }

    #[tokio::test]
    async fn undecodable_record_fails_alone_and_keeps_its_stored_copy() {
        let h = harness();
        let day = date(2024, 5, 1);
        let other = feed_channel("C2", Some("UTC"));
        h.feed
            .set_listings(
                day,
                vec![
                    batch(
                        la(),
                        vec![feed_listing("G1", "0600", 30), feed_listing("B1", "0630", 30)],
                    ),
                    batch(other.clone(), vec![feed_listing("G2", "0600", 30)]),
                ],
            )
            .await;
        h.sync.sync_date(day).await.unwrap();

        let mut partial = batch(la(), vec![feed_listing("G1", "0600", 30)]);
        partial.rejected.push(RejectedListing {
            cid: Some("B1".to_string()),
            reason: "missing field `minutes`".to_string(),
        });
        h.feed
            .set_listings(
                day,
                vec![partial, batch(other, vec![feed_listing("G2", "0600", 30)])],
            )
            .await;
        let report = h.sync.sync_date(day).await.unwrap();

        assert!(report.updated);
        assert_eq!(report.listings_upserted, 2);
        assert_eq!(report.listings_failed, 1);
        assert_eq!(report.listings_removed, 0);
        assert_eq!(h.store.stored_cids().await, vec!["B1", "G1", "G2"]);
    }

    #[tokio::test]
    async fn repeated_channel_batches_share_one_observed_set() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(
                day,
                vec![
                    batch(
                        la(),
                        vec![feed_listing("A1", "0600", 30), feed_listing("A2", "0630", 30)],
                    ),
                    batch(la(), vec![feed_listing("A3", "0700", 30)]),
                ],
            )
            .await;
        let report = h.sync.sync_date(day).await.unwrap();
        assert_eq!(report.listings_removed, 0);
        assert_eq!(h.store.stored_cids().await, vec!["A1", "A2", "A3"]);

        h.feed
            .set_listings(
                day,
                vec![
                    batch(la(), vec![feed_listing("A1", "0600", 30)]),
                    batch(la(), vec![feed_listing("A3", "0700", 30)]),
                ],
            )
            .await;
        let report = h.sync.sync_date(day).await.unwrap();
        assert_eq!(report.listings_removed, 1);
        assert_eq!(h.store.stored_cids().await, vec!["A1", "A3"]);
    }

    #[tokio::test]
    async fn channel_losing_its_timezone_keeps_stored_listings() {
        let h = harness();
        let day = date(2024, 5, 1);
        let other = feed_channel("C2", Some("UTC"));
        h.feed
            .set_listings(
                day,
                vec![
                    batch(la(), vec![feed_listing("A1", "0600", 30)]),
                    batch(other.clone(), vec![feed_listing("B1", "0600", 30)]),
                ],
            )
            .await;
        h.sync.sync_date(day).await.unwrap();

        h.feed
            .set_listings(
                day,
                vec![
                    batch(
                        feed_channel("TESTV", None),
                        vec![feed_listing("A2", "0700", 30)],
                    ),
                    batch(other, vec![feed_listing("B2", "0600", 30)]),
                ],
            )
            .await;
        let report = h.sync.sync_date(day).await.unwrap();

        assert_eq!(report.channels_skipped, 1);
        assert_eq!(report.listings_upserted, 1);
        assert_eq!(h.store.stored_cids().await, vec!["A1", "B2"]);
        let channel = h.sync.channels().find_by_cid("TESTV").await.unwrap().unwrap();
        assert_eq!(channel.timezone_name(), None);
    }

    #[tokio::test]
    async fn failed_upsert_protects_the_stored_listing() {
        let h = harness();
        let day = date(2024, 5, 1);
        let listings = vec![
            feed_listing("A1", "0600", 30),
            feed_listing("A2", "0630", 30),
        ];
        h.feed.set_listings(day, vec![batch(la(), listings.clone())]).await;
        h.sync.sync_date(day).await.unwrap();

        h.store.fail_listing_save("A2");
        let mut bad = feed_listing("A1", "6:00", 30);
        bad.title = "Broken".to_string();
        h.feed
            .set_listings(day, vec![batch(la(), vec![bad, listings[1].clone()])])
            .await;
        let report = h.sync.sync_date(day).await.unwrap();

        assert!(report.updated);
        assert_eq!(report.listings_failed, 2);
        assert_eq!(report.listings_removed, 0);
        assert_eq!(h.store.stored_cids().await, vec!["A1", "A2"]);
        assert_eq!(
            h.sync.find_by_cid("A1").await.unwrap().unwrap().title,
            "Show A1"
        );
    }

    #[tokio::test]
    async fn channels_without_usable_timezone_are_skipped() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(
                day,
                vec![
                    batch(
                        feed_channel("NOTZ", None),
                        vec![feed_listing("N1", "0600", 30)],
                    ),
                    batch(
                        feed_channel("BADTZ", Some("Pacific/Atlantis")),
                        vec![feed_listing("X1", "0600", 30)],
                    ),
                    batch(la(), vec![feed_listing("A1", "0600", 30)]),
                ],
            )
            .await;

        let report = h.sync.sync_date(day).await.unwrap();
        assert_eq!(report.channels_skipped, 2);
        assert_eq!(h.store.stored_cids().await, vec!["A1"]);
        assert!(h.sync.channels().find_by_cid("NOTZ").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn channel_save_failure_skips_only_that_batch() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.store.fail_channel_save("BROKEN");
        h.feed
            .set_listings(
                day,
                vec![
                    batch(
                        feed_channel("BROKEN", Some("UTC")),
                        vec![feed_listing("B1", "0600", 30)],
                    ),
                    batch(la(), vec![feed_listing("A1", "0600", 30)]),
                ],
            )
            .await;
        let report = h.sync.sync_date(day).await.unwrap();
        assert_eq!(report.channels_skipped, 1);
        assert_eq!(report.listings_upserted, 1);
        assert_eq!(h.store.stored_cids().await, vec!["A1"]);
    }

    #[tokio::test]
    async fn query_failure_abandons_removal() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A1", "0600", 30)])])
            .await;
        h.sync.sync_date(day).await.unwrap();

        h.store.fail_listing_queries();
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A2", "0700", 30)])])
            .await;
        let report = h.sync.sync_date(day).await.unwrap();
        assert_eq!(report.listings_removed, 0);
        assert_eq!(report.listings_failed, 1);
        assert_eq!(h.store.inner().listing_count().await, 1);
    }

    #[tokio::test]
    async fn delete_failure_is_logged_not_raised() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A1", "0600", 30)])])
            .await;
        h.sync.sync_date(day).await.unwrap();

        h.store.fail_deletes();
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A2", "0700", 30)])])
            .await;
        let report = h.sync.sync_date(day).await.unwrap();
        assert_eq!(report.listings_removed, 0);
        assert_eq!(h.store.stored_cids().await, vec!["A1", "A2"]);
    }

    #[tokio::test]
    async fn configuration_failure_aborts_the_date() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A1", "0600", 30)])])
            .await;
        h.store.misconfigure();
        let err = h.sync.update_by_date(day).await.unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn fetch_failure_reports_no_update() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed.fail_on(day).await;
        let report = h.sync.sync_date(day).await.unwrap();
        assert!(report.fetch_failed);
        assert!(!report.updated);
    }

    #[tokio::test]
    async fn get_listing_finds_first_entry_and_reports_absence() {
        let h = harness();
        let day = date(2024, 5, 1);
        h.feed
            .set_listings(
                day,
                vec![batch(
                    la(),
                    vec![feed_listing("A1", "0600", 30), feed_listing("A2", "0630", 30)],
                )],
            )
            .await;
        let found = h.sync.get_listing(day, "A1").await.unwrap().unwrap();
        assert_eq!(found.listing.cid, "A1");
        assert_eq!(found.channel.cid, "TESTV");
        assert!(h.sync.get_listing(day, "Z9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_rereads_the_listing_from_its_local_day() {
        let h = harness();
        let day = date(2024, 3, 10);
        h.feed
            .set_listings(day, vec![batch(la(), vec![feed_listing("A1", "1930", 60)])])
            .await;
        h.sync.sync_date(day).await.unwrap();
        let item = h.sync.find_by_cid("A1").await.unwrap().unwrap();

        let mut changed = feed_listing("A1", "1945", 60);
        changed.episode_title = Some("Late Edition".to_string());
        h.feed.set_listings(day, vec![batch(la(), vec![changed])]).await;

        let refreshed = h.sync.refresh_listing_item(&item).await.unwrap().unwrap();
        assert_eq!(refreshed.id, item.id);
        assert_eq!(refreshed.title, "Late Edition");
        assert_eq!(refreshed.start_time, utc("2024-03-11T02:45:00Z"));

        h.feed.set_listings(day, Vec::new()).await;
        assert!(h.sync.refresh_listing_item(&refreshed).await.unwrap().is_none());
    }
}
