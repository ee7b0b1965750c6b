// ⏳ Time-Travel Resolver - "What was this property at instant T?"
//
// Latest change not after T wins. No change at or before T means unset,
// never the present-day value: fallbacks are the snapshot builder's call.

use crate::history::{EntityHistory, PropertyChangeRecord};
use chrono::{DateTime, Utc};

/// The record in effect at `instant`, if any.
///
/// Sequences are sorted by (effective_at, ingestion_seq), so among records sharing
/// a timestamp the later-ingested one is picked.
pub fn record_at<'a>(
    history: &'a EntityHistory,
    property_name: &str,
    instant: DateTime<Utc>,
) -> Option<&'a PropertyChangeRecord> {
    let changes = history.property(property_name);
    let in_effect = changes.partition_point(|r| r.effective_at <= instant);
    in_effect.checked_sub(1).map(|i| &changes[i])
}

/// The value in effect at `instant`, or None when the property was unset then
pub fn value_at<'a>(
    history: &'a EntityHistory,
    property_name: &str,
    instant: DateTime<Utc>,
) -> Option<&'a str> {
    record_at(history, property_name, instant).map(|r| r.value.as_str())
}

/// Changes with effective_at in (from, to]
pub fn changes_between<'a>(
    history: &'a EntityHistory,
    property_name: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> &'a [PropertyChangeRecord] {
    let changes = history.property(property_name);
    let start = changes.partition_point(|r| r.effective_at <= from);
    let end = changes.partition_point(|r| r.effective_at <= to).max(start);
    &changes[start..end]
}

impl EntityHistory {
    pub fn value_at(&self, property_name: &str, instant: DateTime<Utc>) -> Option<&str> {
        value_at(self, property_name, instant)
    }

    pub fn record_at(&self, property_name: &str, instant: DateTime<Utc>) -> Option<&PropertyChangeRecord> {
        record_at(self, property_name, instant)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ChangeLogIndex, RawChangeRecord};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn history_of(records: Vec<RawChangeRecord>) -> EntityHistory {
        ChangeLogIndex::build(records)
            .histories
            .into_values()
            .next()
            .unwrap_or_default()
    }

    fn stage_history() -> EntityHistory {
        history_of(vec![
            RawChangeRecord::new("d-1", "dealstage", "qualification", "2026-01-15T00:00:00Z"),
            RawChangeRecord::new("d-1", "dealstage", "proposal", "2026-02-10T00:00:00Z"),
            RawChangeRecord::new("d-1", "dealstage", "closedwon", "2026-02-25T00:00:00Z"),
        ])
    }

    #[test]
    fn test_value_before_first_change_is_unset() {
        let history = stage_history();
        assert_eq!(history.value_at("dealstage", at(2026, 1, 1)), None);
    }

    #[test]
    fn test_value_between_changes() {
        let history = stage_history();

        assert_eq!(history.value_at("dealstage", at(2026, 2, 1)), Some("qualification"));
        assert_eq!(history.value_at("dealstage", at(2026, 2, 20)), Some("proposal"));
        assert_eq!(history.value_at("dealstage", at(2026, 3, 1)), Some("closedwon"));
    }

    #[test]
    fn test_change_is_effective_at_its_own_instant() {
        let history = stage_history();
        assert_eq!(history.value_at("dealstage", at(2026, 2, 10)), Some("proposal"));
        assert_eq!(
            history.value_at("dealstage", at(2026, 2, 10) - Duration::seconds(1)),
            Some("qualification")
        );
    }

    #[test]
    fn test_unrecorded_property_is_unset() {
        let history = stage_history();
        assert_eq!(history.value_at("amount", at(2030, 1, 1)), None);
        assert!(value_at(&EntityHistory::default(), "dealstage", at(2026, 1, 1)).is_none());
    }

    #[test]
    fn test_later_ingestion_wins_tie() {
        let history = history_of(vec![
            RawChangeRecord::new("d-1", "amount", "5000", "2026-03-01T12:00:00Z"),
            RawChangeRecord::new("d-1", "amount", "7000", "2026-03-01T12:00:00Z"),
        ]);
        let tie = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(history.value_at("amount", tie), Some("7000"));
    }

    #[test]
    fn test_changes_between_is_half_open() {
        let history = stage_history();
        let window = changes_between(&history, "dealstage", at(2026, 2, 10), at(2026, 2, 25));

        assert_eq!(window.len(), 1);
        assert_eq!(window[0].value, "closedwon");
        assert!(changes_between(&history, "dealstage", at(2026, 3, 1), at(2026, 2, 1)).is_empty());
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    fn arb_changes() -> impl Strategy<Value = Vec<(i64, u8)>> {
        // (offset in hours from epoch base, value id); small ranges force ties
        prop::collection::vec((0i64..200, 0u8..4), 0..40)
    }

    fn build(changes: &[(i64, u8)]) -> EntityHistory {
        let base = at(2026, 1, 1);
        history_of(
            changes
                .iter()
                .map(|(hours, value)| {
                    RawChangeRecord::new(
                        "d-1",
                        "amount",
                        &value.to_string(),
                        &(base + Duration::hours(*hours)).to_rfc3339(),
                    )
                })
                .collect(),
        )
    }

    proptest! {
        #[test]
        fn property_no_lookahead(changes in arb_changes(), query in 0i64..220) {
            let base = at(2026, 1, 1);
            let instant = base + Duration::hours(query);
            let full = build(&changes);

            // Drop every record after the query instant: the answer must not move
            let visible: Vec<(i64, u8)> = changes.iter().copied().filter(|(h, _)| *h <= query).collect();
            let truncated = build(&visible);

            prop_assert_eq!(full.value_at("amount", instant), truncated.value_at("amount", instant));
        }

        #[test]
        fn property_monotonic_resolution(changes in arb_changes(), a in 0i64..220, b in 0i64..220) {
            let base = at(2026, 1, 1);
            let (t1, t2) = (base + Duration::hours(a.min(b)), base + Duration::hours(a.max(b)));
            let history = build(&changes);

            if changes_between(&history, "amount", t1, t2).is_empty() {
                prop_assert_eq!(history.value_at("amount", t1), history.value_at("amount", t2));
            }
        }

        #[test]
        fn property_resolved_record_never_after_query(changes in arb_changes(), query in 0i64..220) {
            let instant = at(2026, 1, 1) + Duration::hours(query);
            let history = build(&changes);

            if let Some(record) = history.record_at("amount", instant) {
                prop_assert!(record.effective_at <= instant);
            }
        }
    }
}
