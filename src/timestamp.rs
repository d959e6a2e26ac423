//! UTC timestamps as written to `job.start` / `job.end` / `job.canceled`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::sentinel::SentinelStore;

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Same shape as `date -u '+%Y-%m-%d %T %Z'` inside the generated scripts.
pub const SHELL_DATE_COMMAND: &str = "date -u '+%Y-%m-%d %T %Z'";

/// Format a UTC instant, e.g. `2024-03-01 17:04:05 UTC`.
pub fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

/// Current time in the sentinel format.
pub fn now() -> String {
    format_utc(&Utc::now())
}

/// Parse a sentinel timestamp; `None` unless the zone is UTC.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    let (date_time, zone) = s.trim().rsplit_once(' ')?;
    if !matches!(zone, "UTC" | "GMT" | "Z") {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(date_time, DATE_TIME_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Render a UTC instant in the local zone for display, e.g.
/// `2024-03-01 19:04:05 +02:00`.
///
/// `Local` carries only an offset, not a zone name, so the zone is shown
/// as a numeric `+HH:MM` offset rather than an abbreviation like `CET`.
pub fn to_local(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&Local)
        .format(LOCAL_FORMAT)
        .to_string()
}

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

/// Read a timestamp sentinel; `None` if absent or malformed.
pub fn read(store: &SentinelStore, name: &str) -> Option<DateTime<Utc>> {
    if !store.exists(name) {
        return None;
    }
    parse(&store.read_one(name))
}

/// Read a timestamp sentinel for display in local time.
///
/// Falls back to the raw text when it does not parse, and to an empty
/// string when the file does not exist.
pub fn read_local(store: &SentinelStore, name: &str) -> String {
    match read(store, name) {
        Some(dt) => to_local(&dt),
        None => store.read_one(name),
    }
}
