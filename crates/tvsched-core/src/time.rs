//! Channel-local time conversion.
//!
//! Listing times arrive as a calendar date plus an `HHMM` time of day in the
//! channel's zone. Everything is persisted in UTC, so every conversion goes
//! through [`compute_storage_instant`] or [`compute_day_window`].

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("invalid time of day {value:?}, expected HHMM")]
    InvalidTimeFormat { value: String },
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
}

/// UTC bounds of one channel-local calendar day, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeError::UnknownTimezone(name.to_string()))
}

/// Parses a strict four-digit `HHMM` time of day.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, TimeError> {
    let invalid = || TimeError::InvalidTimeFormat {
        value: value.to_string(),
    };
    let bytes = value.as_bytes();
    if bytes.len() != 4 || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let digit = |i: usize| u32::from(bytes[i] - b'0');
    let hour = digit(0) * 10 + digit(1);
    let minute = digit(2) * 10 + digit(3);
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Converts a channel-local date and `HHMM` time of day to a UTC instant.
pub fn compute_storage_instant(
    local_date: NaiveDate,
    time_of_day: &str,
    timezone: Tz,
) -> Result<DateTime<Utc>, TimeError> {
    let time = parse_time_of_day(time_of_day)?;
    Ok(localize(timezone, local_date.and_time(time)).with_timezone(&Utc))
}

/// Local midnight to the following local midnight, in UTC.
pub fn compute_day_window(local_date: NaiveDate, timezone: Tz) -> DayWindow {
    let start = localize(timezone, local_date.and_time(NaiveTime::MIN)).with_timezone(&Utc);
    let end = match local_date.succ_opt() {
        Some(next) => localize(timezone, next.and_time(NaiveTime::MIN)).with_timezone(&Utc),
        None => start + Duration::hours(24),
    };
    DayWindow { start, end }
}

/// Calendar date of `instant` as seen in `timezone`.
pub fn local_date_of(instant: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    instant.with_timezone(&timezone).date_naive()
}

// Ambiguous wall times take the earlier instant. Wall times inside a DST gap
// are shifted forward using the offset in force before the gap.
fn localize(timezone: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let before = timezone
                .offset_from_utc_datetime(&(naive - Duration::days(1)))
                .fix();
            let utc = naive - Duration::seconds(i64::from(before.local_minus_utc()));
            Utc.from_utc_datetime(&utc).with_timezone(&timezone)
        }
    }
}
