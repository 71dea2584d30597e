use thiserror::Error;
use tvsched_core::TimeError;
use tvsched_feed::FeedError;
use tvsched_storage::StoreError;
use uuid::Uuid;

/// Failures of the sync engine. Only [`SyncError::Configuration`] is allowed
/// to escape the top-level update operations; everything else is logged and
/// confined to one listing or one channel/day.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote fetch failed for {unit}: {source}")]
    RemoteFetch {
        unit: String,
        #[source]
        source: FeedError,
    },
    #[error("channel {cid} has no usable timezone: {reason}")]
    MissingTimezone { cid: String, reason: String },
    #[error("listing {cid} has an invalid start time: {source}")]
    InvalidTimeFormat {
        cid: String,
        #[source]
        source: TimeError,
    },
    #[error("listing {cid} references unknown channel {channel_id}")]
    UnknownChannel { cid: String, channel_id: Uuid },
    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("content storage is misconfigured: {0}")]
    Configuration(#[source] StoreError),
}

impl SyncError {
    /// Wraps a store failure, promoting configuration errors to [`SyncError::Configuration`].
    pub fn storage(operation: &'static str, source: StoreError) -> Self {
        if source.is_configuration() {
            Self::Configuration(source)
        } else {
            Self::Storage { operation, source }
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
