//! Core domain model for the TV schedule sync engine: local entities, the
//! upstream feed record shapes, and channel-local time utilities.

pub mod time;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub use time::{
    compute_day_window, compute_storage_instant, local_date_of, parse_time_of_day,
    parse_timezone, DayWindow, TimeError,
};

pub const CRATE_NAME: &str = "tvsched-core";

/// Returns the value of an optional feed attribute when it is present and not blank.
pub fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Local channel record, matched to the feed by `cid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub cid: String,
    pub name: String,
    pub short_name: Option<String>,
    pub external_id: Option<String>,
    /// IANA zone name used to interpret listing times.
    pub timezone: Option<String>,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub weight: i32,
}

impl Channel {
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cid: cid.into(),
            name: String::new(),
            short_name: None,
            external_id: None,
            timezone: None,
            schedule_enabled: false,
            is_default: false,
            weight: 0,
        }
    }

    pub fn timezone_name(&self) -> Option<&str> {
        present(&self.timezone)
    }
}

/// Reference into the external show catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowRef {
    pub id: String,
    pub title: Option<String>,
}

/// Local schedule entry. Times are stored in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingItem {
    pub id: Uuid,
    pub cid: String,
    pub title: String,
    pub show_title: String,
    pub description: Option<String>,
    pub channel_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub program_external_id: Option<String>,
    pub episode_external_id: Option<String>,
    pub airing_type: Option<String>,
    pub program_id: Option<String>,
    pub show_image_uri: Option<String>,
    pub episode_image_uri: Option<String>,
    pub show_ref: Option<ShowRef>,
}

impl ListingItem {
    pub fn new(cid: impl Into<String>, channel_id: Uuid, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cid: cid.into(),
            title: String::new(),
            show_title: String::new(),
            description: None,
            channel_id,
            start_time,
            end_time: start_time,
            duration_minutes: 0,
            program_external_id: None,
            episode_external_id: None,
            airing_type: None,
            program_id: None,
            show_image_uri: None,
            episode_image_uri: None,
            show_ref: None,
        }
    }
}

/// Channel definition as reported by the remote feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedChannel {
    pub cid: String,
    pub full_name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// One channel's listings for a single date. Listing records that do not
/// decode land in `rejected` instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawChannelListings")]
pub struct ChannelListings {
    #[serde(flatten)]
    pub channel: FeedChannel,
    pub listings: Vec<FeedListing>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedListing>,
}

impl ChannelListings {
    pub fn new(channel: FeedChannel, listings: Vec<FeedListing>) -> Self {
        Self {
            channel,
            listings,
            rejected: Vec::new(),
        }
    }
}

/// A feed listing record that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedListing {
    /// The record's `cid`, when it carried a readable one.
    pub cid: Option<String>,
    pub reason: String,
}

#[derive(Deserialize)]
struct RawChannelListings {
    #[serde(flatten)]
    channel: FeedChannel,
    #[serde(default)]
    listings: Vec<serde_json::Value>,
}

impl From<RawChannelListings> for ChannelListings {
    fn from(raw: RawChannelListings) -> Self {
        let mut batch = ChannelListings::new(raw.channel, Vec::with_capacity(raw.listings.len()));
        for value in raw.listings {
            let cid = value
                .get("cid")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            match serde_json::from_value::<FeedListing>(value) {
                Ok(listing) => batch.listings.push(listing),
                Err(err) => batch.rejected.push(RejectedListing {
                    cid,
                    reason: err.to_string(),
                }),
            }
        }
        batch
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedListing {
    pub cid: String,
    pub title: String,
    #[serde(default)]
    pub episode_title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub episode_description: Option<String>,
    /// Channel-local time of day, `HHMM`.
    pub start_time: String,
    pub minutes: u32,
    #[serde(default)]
    pub program_external_id: Option<String>,
    /// Upstream calls episodes "shows"; this is the episode identifier.
    #[serde(default)]
    pub show_external_id: Option<String>,
    #[serde(default)]
    pub airing_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub program_id: Option<String>,
    #[serde(default)]
    pub images: Vec<FeedImage>,
    #[serde(default)]
    pub episode_images: Vec<FeedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedImage {
    pub image: String,
    #[serde(default)]
    pub ratio: Option<String>,
    #[serde(default)]
    pub external_profile: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    }))
}
