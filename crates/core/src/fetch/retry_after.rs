//! `Retry-After` header parsing (delta-seconds or HTTP-date).

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a `Retry-After` value relative to `now`.
///
/// Returns `None` when the value is neither delta-seconds nor an HTTP-date;
/// callers then fall back to their own backoff. Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    parse_http_date(value).map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
}

/// IMF-fixdate, with the obsolete RFC 850 and asctime forms as fallbacks.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %d %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&collapsed, format).ok())
        .map(|naive| naive.and_utc())
}
