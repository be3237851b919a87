use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::format::StrftimeItems;
use chrono::{DateTime, TimeZone, Utc};

/// current timestamp
pub fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// current timestamp in unix nanoseconds, saturating at `i64::MAX`
pub fn now_unix_nano() -> i64 {
    i64::try_from(now().as_nanos()).unwrap_or(i64::MAX)
}

pub fn unix_nano_to_time(unix_nano: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(unix_nano)
}

pub fn time_format(dt: DateTime<Utc>) -> String {
    let fmt = StrftimeItems::new("%Y-%m-%d %H:%M:%S");
    format!("{}", dt.format_with_items(fmt))
}

/// RFC3339 with nanosecond precision, e.g. `2023-05-01T10:00:00.000000001Z`.
pub fn time_format_nano(unix_nano: i64) -> String {
    unix_nano_to_time(unix_nano)
        .format("%Y-%m-%dT%H:%M:%S%.9fZ")
        .to_string()
}
