use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub feed_dir: PathBuf,
    pub store_path: PathBuf,
    pub state_path: PathBuf,
    pub queue_path: PathBuf,
    pub channels_file: PathBuf,
    pub shows_file: Option<PathBuf>,
    pub prune_max_age: RetentionPeriod,
    pub scheduler_enabled: bool,
    pub day_update_cron: String,
    pub full_update_cron: String,
    pub prune_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            feed_dir: path_var("TVSCHED_FEED_DIR", "./feed"),
            store_path: path_var("TVSCHED_STORE_PATH", "./data/content.json"),
            state_path: path_var("TVSCHED_STATE_PATH", "./data/state.json"),
            queue_path: path_var("TVSCHED_QUEUE_PATH", "./data/prune-queue.json"),
            channels_file: path_var("TVSCHED_CHANNELS_FILE", "./channels.yaml"),
            shows_file: std::env::var("TVSCHED_SHOWS_FILE").ok().map(PathBuf::from),
            prune_max_age: std::env::var("TVSCHED_PRUNE_MAX_AGE")
                .ok()
                .and_then(|v| match v.parse() {
                    Ok(period) => Some(period),
                    Err(err) => {
                        warn!(error = %err, "ignoring TVSCHED_PRUNE_MAX_AGE");
                        None
                    }
                })
                .unwrap_or_default(),
            scheduler_enabled: std::env::var("TVSCHED_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            // tokio-cron-scheduler expressions carry a leading seconds field.
            day_update_cron: std::env::var("TVSCHED_DAY_UPDATE_CRON")
                .unwrap_or_else(|_| "0 0 5 * * *".to_string()),
            full_update_cron: std::env::var("TVSCHED_FULL_UPDATE_CRON")
                .unwrap_or_else(|_| "0 30 2 * * Sun".to_string()),
            prune_cron: std::env::var("TVSCHED_PRUNE_CRON")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),
        }
    }
}

fn path_var(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

/// How long listings are kept before the pruner queues them for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPeriod {
    Months(u32),
    Days(u32),
}

impl Default for RetentionPeriod {
    fn default() -> Self {
        Self::Months(1)
    }
}

impl RetentionPeriod {
    /// Instants at or before the returned cutoff are stale.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let cutoff = match self {
            Self::Months(n) => now.checked_sub_months(Months::new(n)),
            Self::Days(n) => now.checked_sub_signed(Duration::days(i64::from(n))),
        };
        cutoff.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid retention period {0:?}, expected P<n>M, P<n>W or P<n>D")]
pub struct InvalidPeriod(String);

impl FromStr for RetentionPeriod {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPeriod(s.to_string());
        let upper = s.trim().to_ascii_uppercase();
        let body = upper.strip_prefix('P').ok_or_else(invalid)?;
        if body.len() < 2 {
            return Err(invalid());
        }
        let (count, unit) = body.split_at(body.len() - 1);
        if !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let count: u32 = count.parse().map_err(|_| invalid())?;
        match unit {
            "M" => Ok(Self::Months(count)),
            "W" => count.checked_mul(7).map(Self::Days).ok_or_else(invalid),
            "D" => Ok(Self::Days(count)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Months(n) => write!(f, "P{n}M"),
            Self::Days(n) => write!(f, "P{n}D"),
        }
    }
}
