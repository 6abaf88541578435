//! Instrument timestamps: 100 ns ticks counted from 0001-01-01T00:00:00.

use chrono::{DateTime, NaiveDateTime};

/// Ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Tick count of the Unix epoch, 1970-01-01T00:00:00.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Convert an instrument tick count to a naive UTC timestamp.
pub fn ticks_to_datetime(ticks: i64) -> crate::Result<NaiveDateTime> {
    let out_of_range =
        || crate::Error::integrity(format!("timestamp out of range: {ticks} ticks"));
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS).ok_or_else(out_of_range)?;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(seconds, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or_else(out_of_range)
}

/// Milliseconds since the Unix epoch.
pub fn to_epoch_millis(datetime: &NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_millis()
}
