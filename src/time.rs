use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap_or_default())
}

/// IANA id of the device timezone, falling back to UTC when the platform
/// cannot report one.
pub fn device_timezone_id() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

fn parse_tz(id: &str) -> Tz {
    id.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

/// Inclusive epoch-millisecond bounds of the calendar day containing `now_ms`
/// in the given zone: local midnight through 23:59:59.999.
pub fn local_day_bounds_ms(now_ms: i64, tz_id: &str) -> (i64, i64) {
    let tz = parse_tz(tz_id);
    let local = to_date(now_ms).with_timezone(&tz);
    let date = local.date_naive();
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    // earliest() handles the DST gap where local midnight does not exist.
    let start = tz
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(now_ms);
    let end = start + Duration::days(1).num_milliseconds() - 1;
    (start, end)
}
