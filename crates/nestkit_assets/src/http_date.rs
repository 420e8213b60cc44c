//! HTTP-date handling for `If-Modified-Since` and `Last-Modified`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Formats a timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format(IMF_FIXDATE).to_string()
}

/// Parses an HTTP date.
///
/// Accepts IMF-fixdate and the RFC 2822 variants some origins still send.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, IMF_FIXDATE) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
