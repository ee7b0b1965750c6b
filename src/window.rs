// 📅 Month Windows - Reporting-month boundaries in a fixed reference timezone
//
// start = first day 00:00:00 local, end = last day 23:59:59 local.
// Instants are second-resolution, so consecutive windows tile time with no gap:
// end(M) + 1s == start(M+1).

use crate::error::EngineError;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// BOUNDARY POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryPolicy {
    /// Reference timezone as a fixed UTC offset, e.g. "+01:00"
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy {
            utc_offset: default_utc_offset(),
        }
    }
}

impl BoundaryPolicy {
    pub fn with_offset(utc_offset: &str) -> Self {
        BoundaryPolicy {
            utc_offset: utc_offset.to_string(),
        }
    }

    /// Parse `±HH:MM` into a chrono offset
    pub fn offset(&self) -> Result<FixedOffset, EngineError> {
        let invalid = || EngineError::InvalidConfig(format!("invalid utc_offset '{}'", self.utc_offset));

        let raw = self.utc_offset.trim();
        if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
            return FixedOffset::east_opt(0).ok_or_else(invalid);
        }

        let (sign, rest) = match raw.chars().next() {
            Some('+') => (1, &raw[1..]),
            Some('-') => (-1, &raw[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
    }
}

// ============================================================================
// MONTH KEY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, EngineError> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::MissingWindow(format!("month {} out of range", month)));
        }
        Ok(MonthKey { year, month })
    }

    /// Following month. Fails past the last representable year.
    pub fn next(&self) -> Result<MonthKey, EngineError> {
        if self.month < 12 {
            return Ok(MonthKey { year: self.year, month: self.month + 1 });
        }
        let year = self.year.checked_add(1).ok_or_else(|| {
            EngineError::MissingWindow(format!("no month after {}", self))
        })?;
        Ok(MonthKey { year, month: 1 })
    }

    fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    fn last_day(&self) -> Option<NaiveDate> {
        self.next().ok()?.first_day()?.pred_opt()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = EngineError;

    /// Parse `YYYY-MM`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::MissingWindow(format!("invalid month '{}', expected YYYY-MM", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month)
    }
}

// ============================================================================
// MONTH WINDOW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthWindow {
    pub key: MonthKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    /// Window with explicit bounds. Fails when end ≤ start.
    pub fn new(key: MonthKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::MissingWindow(format!(
                "window {} ends ({}) at or before it starts ({})",
                key, end, start
            )));
        }
        Ok(MonthWindow { key, start, end })
    }

    /// Calendar month under the boundary policy
    pub fn for_month(key: MonthKey, policy: &BoundaryPolicy) -> Result<Self, EngineError> {
        let offset = policy.offset()?;
        let unresolvable = || EngineError::MissingWindow(format!("cannot resolve bounds for {}", key));

        let first = key.first_day().and_then(|d| d.and_hms_opt(0, 0, 0)).ok_or_else(unresolvable)?;
        let last = key.last_day().and_then(|d| d.and_hms_opt(23, 59, 59)).ok_or_else(unresolvable)?;

        let start = offset.from_local_datetime(&first).single().ok_or_else(unresolvable)?;
        let end = offset.from_local_datetime(&last).single().ok_or_else(unresolvable)?;

        Self::new(key, start.with_timezone(&Utc), end.with_timezone(&Utc))
    }

    /// Membership at second resolution: start ≤ t ≤ end
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let instant = instant.trunc_subsecs(0);
        self.start <= instant && instant <= self.end
    }

    pub fn label(&self) -> String {
        self.key.to_string()
    }
}

/// Contiguous windows from `from` to `to`, both inclusive
pub fn month_range(
    from: MonthKey,
    to: MonthKey,
    policy: &BoundaryPolicy,
) -> Result<Vec<MonthWindow>, EngineError> {
    if to < from {
        return Err(EngineError::MissingWindow(format!(
            "range end {} is before range start {}",
            to, from
        )));
    }

    let mut windows = Vec::new();
    let mut current = from;
    loop {
        windows.push(MonthWindow::for_month(current, policy)?);
        if current >= to {
            break;
        }
        current = current.next()?;
    }

    tracing::debug!(from = %from, to = %to, count = windows.len(), "month windows generated");
    Ok(windows)
}

/// Month key of an instant under the boundary policy
pub fn month_of(instant: DateTime<Utc>, policy: &BoundaryPolicy) -> Result<MonthKey, EngineError> {
    let local = instant.with_timezone(&policy.offset()?);
    MonthKey::new(local.year(), local.month())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn key(y: i32, m: u32) -> MonthKey {
        MonthKey::new(y, m).unwrap()
    }

    #[test]
    fn test_utc_month_bounds() {
        let window = MonthWindow::for_month(key(2026, 2), &BoundaryPolicy::default()).unwrap();

        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 59).unwrap());
        assert_eq!(window.label(), "2026-02");
    }

    #[test]
    fn test_leap_february() {
        let window = MonthWindow::for_month(key(2028, 2), &BoundaryPolicy::default()).unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2028, 2, 29, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        let window = MonthWindow::for_month(key(2025, 12), &BoundaryPolicy::default()).unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap());
        assert_eq!(key(2025, 12).next().unwrap(), key(2026, 1));
    }

    #[test]
    fn test_last_representable_year_is_missing_window() {
        let last = "2147483647-12".parse::<MonthKey>().unwrap();

        assert!(matches!(last.next(), Err(EngineError::MissingWindow(_))));
        assert!(matches!(
            MonthWindow::for_month(last, &BoundaryPolicy::default()),
            Err(EngineError::MissingWindow(_))
        ));
        assert!(month_range(last, last, &BoundaryPolicy::default()).is_err());
    }

    #[test]
    fn test_offset_shifts_bounds() {
        let policy = BoundaryPolicy::with_offset("+01:00");
        let window = MonthWindow::for_month(key(2026, 1), &policy).unwrap();

        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 1, 31, 22, 59, 59).unwrap());
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(BoundaryPolicy::with_offset("01:00").offset().is_err());
        assert!(BoundaryPolicy::with_offset("+25:00").offset().is_err());
        assert!(BoundaryPolicy::with_offset("-05:30").offset().is_ok());
        assert!(BoundaryPolicy::with_offset("Z").offset().is_ok());
    }

    #[test]
    fn test_inverted_window_is_missing_window() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let result = MonthWindow::new(key(2026, 2), start, start);
        assert!(matches!(result, Err(EngineError::MissingWindow(_))));
    }

    #[test]
    fn test_month_key_parsing() {
        assert_eq!("2026-03".parse::<MonthKey>().unwrap(), key(2026, 3));
        assert!("2026-13".parse::<MonthKey>().is_err());
        assert!("March".parse::<MonthKey>().is_err());
        assert!(MonthKey::new(2026, 0).is_err());
    }

    #[test]
    fn test_month_range_inclusive() {
        let windows = month_range(key(2025, 11), key(2026, 2), &BoundaryPolicy::default()).unwrap();
        let labels: Vec<String> = windows.iter().map(|w| w.label()).collect();
        assert_eq!(labels, vec!["2025-11", "2025-12", "2026-01", "2026-02"]);

        assert!(month_range(key(2026, 2), key(2026, 1), &BoundaryPolicy::default()).is_err());
        assert_eq!(month_range(key(2026, 2), key(2026, 2), &BoundaryPolicy::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_consecutive_windows_touch() {
        let windows = month_range(key(2026, 1), key(2026, 12), &BoundaryPolicy::default()).unwrap();
        for pair in windows.windows(2) {
            assert!(pair[0].end < pair[1].start);
            assert_eq!(pair[1].start - pair[0].end, Duration::seconds(1));
        }
    }

    #[test]
    fn test_contains_truncates_subseconds() {
        let window = MonthWindow::for_month(key(2026, 1), &BoundaryPolicy::default()).unwrap();
        let late = window.end + Duration::milliseconds(900);
        assert!(window.contains(late));
        assert!(!window.contains(window.end + Duration::seconds(1)));
    }

    #[test]
    fn test_month_of_respects_offset() {
        let instant = Utc.with_ymd_and_hms(2026, 1, 31, 23, 30, 0).unwrap();
        assert_eq!(month_of(instant, &BoundaryPolicy::default()).unwrap(), key(2026, 1));
        assert_eq!(month_of(instant, &BoundaryPolicy::with_offset("+01:00")).unwrap(), key(2026, 2));
    }

    proptest! {
        #[test]
        fn property_year_partitioned_by_windows(
            second in 0i64..(365 * 24 * 3600),
            millis in 0i64..1000,
            offset_hours in -11i32..12,
        ) {
            let policy = BoundaryPolicy::with_offset(&format!(
                "{}{:02}:00",
                if offset_hours < 0 { '-' } else { '+' },
                offset_hours.abs()
            ));
            let windows = month_range(key(2026, 1), key(2026, 12), &policy).unwrap();
            let instant = windows[0].start + Duration::seconds(second) + Duration::milliseconds(millis);

            let hits = windows.iter().filter(|w| w.contains(instant)).count();
            prop_assert_eq!(hits, 1);
        }
    }
}
