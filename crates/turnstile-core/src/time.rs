//! # Timestamp Math
//!
//! Pure helpers around the two clocks in play:
//!
//! - Device timestamps are **naive** wall-clock values with no zone.
//!   They stay naive while staged locally; the machine's IANA zone is
//!   applied only when a record leaves for the remote system.
//! - Watermarks (`synced_at`, `last_connected`, audit timestamps) are
//!   plain UTC.
//!
//! ## DST Convention
//! A naive local time falling in the repeated hour at the end of DST is
//! resolved with the **later** offset. A time falling in the skipped
//! hour at the start of DST does not exist and is reported as an error;
//! callers fall back to sending the naive value unchanged.

use chrono::{LocalResult, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use thiserror::Error;

/// Timezone resolution failures. Never fatal: callers degrade to the
/// naive timestamp.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    /// The stored zone name is not a known IANA timezone.
    #[error("unknown IANA timezone '{0}'")]
    UnknownZone(String),

    /// The naive local time falls in a DST gap and does not exist.
    #[error("local time {0} does not exist in zone {1}")]
    NonexistentLocalTime(NaiveDateTime, Tz),
}

/// Truncates a timestamp to the start of its calendar day.
///
/// Fetch watermarks are truncated this way so a partial day is always
/// re-read in full, tolerating devices that report events slightly out
/// of order within a day.
pub fn start_of_day(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveDateTime::new(ts.date(), NaiveTime::MIN)
}

/// Drops sub-second precision from a device timestamp.
///
/// Terminals report whole seconds; stripping stray sub-second noise keeps
/// the (machine, user, timestamp) uniqueness key and the derived event
/// uid stable.
pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Derives the deterministic event identifier for a clock event.
///
/// The uid is a pure function of (machine id, business user id, device
/// timestamp), so re-fetching the same event always produces the same
/// identifier.
pub fn event_uid(machine_id: i64, user_id: &str, ts: NaiveDateTime) -> String {
    format!("{}-{}-{}", machine_id, user_id, ts.format("%Y%m%d%H%M%S"))
}

/// Interprets a naive device timestamp as wall-clock time in `zone` and
/// converts it to naive UTC.
///
/// Ambiguous times (repeated DST hour) resolve with the later offset.
pub fn localize_to_utc(ts: NaiveDateTime, zone: &str) -> Result<NaiveDateTime, TimeError> {
    let tz: Tz = zone
        .parse()
        .map_err(|_| TimeError::UnknownZone(zone.to_string()))?;

    match tz.from_local_datetime(&ts) {
        LocalResult::Single(dt) => Ok(dt.naive_utc()),
        LocalResult::Ambiguous(_, later) => Ok(later.naive_utc()),
        LocalResult::None => Err(TimeError::NonexistentLocalTime(ts, tz)),
    }
}

/// Converts a naive UTC timestamp back into wall-clock time in `zone`.
///
/// Inverse of [`localize_to_utc`] for unambiguous times.
pub fn utc_to_local(ts: NaiveDateTime, zone: &str) -> Result<NaiveDateTime, TimeError> {
    let tz: Tz = zone
        .parse()
        .map_err(|_| TimeError::UnknownZone(zone.to_string()))?;

    Ok(tz.from_utc_datetime(&ts).naive_local())
}

// =============================================================================
// Tests
// =============================================================================
