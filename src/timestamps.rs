// ⏱️ Timestamp parsing
// Instants are second-resolution UTC; sub-second parts are dropped on the way in.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};

/// Parse an instant from any of the formats sources hand us:
/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), `YYYY-MM-DD` or `YYYYMMDD` (midnight UTC),
/// or epoch milliseconds.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // All digits: compact `YYYYMMDD`, or epoch milliseconds (10+ digits); anything else is rejected
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return match raw.len() {
            8 => NaiveDate::parse_from_str(raw, "%Y%m%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
            len if len >= 10 => {
                let millis: i64 = raw.parse().ok()?;
                DateTime::from_timestamp_millis(millis).map(|t| t.trunc_subsecs(0))
            }
            _ => None,
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).trunc_subsecs(0));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().trunc_subsecs(0));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    None
}

/// Parse a calendar date (close dates). Accepts `YYYY-MM-DD` or any instant format.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    parse_instant(raw).map(|t| t.date_naive())
}
