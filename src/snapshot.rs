// 📸 Snapshot Builder - Entity state at one instant
//
// Each tracked property is resolved on its own through the time-travel resolver.
// Fallback to the entity's current value happens only when the property has
// no history at all (constant since creation, never captured as a change).
// A property whose recorded changes all post-date the instant is absent.

use crate::error::{EngineError, Warning, WarningKind};
use crate::history::{EntityHistory, PropertyChangeRecord};
use crate::timestamps::parse_date;
use crate::topology::StageId;
use crate::window::MonthWindow;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// PROPERTY MAPPING
// ============================================================================

/// Source property names for the tracked fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMapping {
    #[serde(default = "default_stage_property")]
    pub stage: String,

    #[serde(default = "default_amount_property")]
    pub amount: String,

    #[serde(default = "default_close_date_property")]
    pub close_date: String,

    #[serde(default = "default_probability_property")]
    pub probability: Option<String>,
}

fn default_stage_property() -> String {
    "dealstage".to_string()
}

fn default_amount_property() -> String {
    "amount".to_string()
}

fn default_close_date_property() -> String {
    "closedate".to_string()
}

fn default_probability_property() -> Option<String> {
    Some("hs_deal_stage_probability".to_string())
}

impl Default for PropertyMapping {
    fn default() -> Self {
        PropertyMapping {
            stage: default_stage_property(),
            amount: default_amount_property(),
            close_date: default_close_date_property(),
            probability: default_probability_property(),
        }
    }
}

// ============================================================================
// ENTITY INPUT
// ============================================================================

/// Present-day values as reported by the data source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    pub stage: Option<StageId>,
    pub amount: Option<Decimal>,
    pub close_date: Option<NaiveDate>,
    pub probability: Option<f64>,
}

/// Entity summary: identity, creation instant and current values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub current: CurrentState,
}

impl EntitySummary {
    pub fn new(entity_id: &str, name: &str, created_at: Option<DateTime<Utc>>) -> Self {
        EntitySummary {
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            created_at,
            current: CurrentState::default(),
        }
    }

    /// Builder: current stage
    pub fn with_stage(mut self, stage: &str) -> Self {
        self.current.stage = Some(stage.to_string());
        self
    }

    /// Builder: current amount
    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.current.amount = Some(amount);
        self
    }

    /// Builder: current close date
    pub fn with_close_date(mut self, close_date: NaiveDate) -> Self {
        self.current.close_date = Some(close_date);
        self
    }

    /// Builder: current probability
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.current.probability = Some(probability);
        self
    }

    /// Created within [start, end] (second resolution)
    pub fn created_within(&self, window: &MonthWindow) -> bool {
        self.created_at.map_or(false, |t| window.contains(t))
    }
}

// ============================================================================
// ENTITY STATE
// ============================================================================

/// Resolved snapshot. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub stage: Option<StageId>,
    pub amount: Option<Decimal>,
    pub target_close_date: Option<NaiveDate>,
    pub probability: Option<f64>,
    pub as_of: DateTime<Utc>,

    /// effective_at of the stage record in force (None when the stage came from fallback)
    pub stage_since: Option<DateTime<Utc>>,
}

impl EntityState {
    /// The entity did not exist (or nothing is known) at `as_of`
    pub fn absent(as_of: DateTime<Utc>) -> Self {
        EntityState {
            stage: None,
            amount: None,
            target_close_date: None,
            probability: None,
            as_of,
            stage_since: None,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.stage.is_none()
    }

    /// Same stage, amount and close date
    pub fn same_position(&self, other: &EntityState) -> bool {
        self.stage == other.stage
            && self.amount == other.amount
            && self.target_close_date == other.target_close_date
    }
}

/// A state plus whatever could not be parsed while building it
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: EntityState,
    pub warnings: Vec<Warning>,
}

// ============================================================================
// VALUE PARSING
// ============================================================================

/// Parse a money amount. Accepts "20000", "20000.50", "20000,50" and "20,000.50".
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let normalized = if raw.contains(',') && !raw.contains('.') {
        raw.replace(',', ".")
    } else {
        raw.replace(',', "")
    };

    Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .ok()
}

/// Parse a probability fraction in [0, 1]
pub fn parse_probability(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

// ============================================================================
// SNAPSHOT BUILDER
// ============================================================================

/// How one property was resolved
enum Resolution<'a> {
    Recorded(&'a PropertyChangeRecord),
    Unset,
    Fallback,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    mapping: PropertyMapping,
}

impl SnapshotBuilder {
    pub fn new(mapping: PropertyMapping) -> Self {
        SnapshotBuilder { mapping }
    }

    pub fn mapping(&self) -> &PropertyMapping {
        &self.mapping
    }

    fn resolve<'a>(
        &self,
        history: Option<&'a EntityHistory>,
        property: &str,
        instant: DateTime<Utc>,
    ) -> Resolution<'a> {
        match history.and_then(|h| h.record_at(property, instant)) {
            Some(record) => Resolution::Recorded(record),
            None if history.map_or(true, |h| !h.has_property(property)) => Resolution::Fallback,
            None => Resolution::Unset,
        }
    }

    /// Resolve a recorded value through `parse`, reporting values that fail to parse
    fn parsed<T>(
        &self,
        entity_id: &str,
        record: &PropertyChangeRecord,
        parse: impl Fn(&str) -> Option<T>,
        warnings: &mut Vec<Warning>,
    ) -> Option<T> {
        if record.value.trim().is_empty() {
            return None;
        }
        let parsed = parse(&record.value);
        if parsed.is_none() {
            warnings.push(Warning::new(
                WarningKind::UnparseableValue,
                Some(entity_id),
                format!(
                    "{} value '{}' at {} could not be parsed",
                    record.property_name, record.value, record.effective_at
                ),
            ));
        }
        parsed
    }

    /// State of `entity` at `instant`.
    ///
    /// Fails with `MissingWindow` when the entity has no creation instant.
    pub fn snapshot(
        &self,
        entity: &EntitySummary,
        history: Option<&EntityHistory>,
        instant: DateTime<Utc>,
    ) -> Result<Snapshot, EngineError> {
        let created_at = entity.created_at.ok_or_else(|| {
            EngineError::MissingWindow(format!(
                "entity {} has no creation instant",
                entity.entity_id
            ))
        })?;

        if instant < created_at {
            return Ok(Snapshot {
                state: EntityState::absent(instant),
                warnings: Vec::new(),
            });
        }

        let id = entity.entity_id.as_str();
        let current = &entity.current;
        let mut warnings = Vec::new();

        let (stage, stage_since) = match self.resolve(history, &self.mapping.stage, instant) {
            Resolution::Recorded(r) if r.value.trim().is_empty() => (None, Some(r.effective_at)),
            Resolution::Recorded(r) => (Some(r.value.trim().to_string()), Some(r.effective_at)),
            Resolution::Unset => (None, None),
            Resolution::Fallback => (current.stage.clone(), None),
        };

        let amount = match self.resolve(history, &self.mapping.amount, instant) {
            Resolution::Recorded(r) => self.parsed(id, r, parse_amount, &mut warnings),
            Resolution::Unset => None,
            Resolution::Fallback => current.amount,
        };

        let target_close_date = match self.resolve(history, &self.mapping.close_date, instant) {
            Resolution::Recorded(r) => self.parsed(id, r, parse_date, &mut warnings),
            Resolution::Unset => None,
            Resolution::Fallback => current.close_date,
        };

        let probability = match &self.mapping.probability {
            None => None,
            Some(property) => match self.resolve(history, property, instant) {
                Resolution::Recorded(r) => self.parsed(id, r, parse_probability, &mut warnings),
                Resolution::Unset => None,
                Resolution::Fallback => current.probability,
            },
        };

        Ok(Snapshot {
            state: EntityState {
                stage,
                amount,
                target_close_date,
                probability,
                as_of: instant,
                stage_since,
            },
            warnings,
        })
    }

    /// Start-of-window and end-of-window snapshots
    pub fn window_snapshots(
        &self,
        entity: &EntitySummary,
        history: Option<&EntityHistory>,
        window: &MonthWindow,
    ) -> Result<(Snapshot, Snapshot), EngineError> {
        let start = self.snapshot(entity, history, window.start)?;
        let end = self.snapshot(entity, history, window.end)?;
        Ok((start, end))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ChangeLogIndex, RawChangeRecord};
    use crate::window::{BoundaryPolicy, MonthKey};
    use chrono::TimeZone;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn history_of(records: Vec<RawChangeRecord>) -> EntityHistory {
        ChangeLogIndex::build(records).histories.into_values().next().unwrap()
    }

    fn deal() -> EntitySummary {
        EntitySummary::new("d-1", "Acme renewal", Some(at(2026, 1, 15)))
            .with_stage("proposal")
            .with_amount(dec(20000))
            .with_close_date(NaiveDate::from_ymd_opt(2026, 6, 30).unwrap())
    }

    #[test]
    fn test_no_history_falls_back_to_current() {
        let builder = SnapshotBuilder::default();
        let snap = builder.snapshot(&deal(), None, at(2026, 2, 1)).unwrap();

        assert_eq!(snap.state.stage.as_deref(), Some("proposal"));
        assert_eq!(snap.state.amount, Some(dec(20000)));
        assert_eq!(snap.state.target_close_date, NaiveDate::from_ymd_opt(2026, 6, 30));
        assert_eq!(snap.state.stage_since, None);
        assert!(snap.warnings.is_empty());
    }

    #[test]
    fn test_before_creation_is_absent() {
        let builder = SnapshotBuilder::default();
        let snap = builder.snapshot(&deal(), None, at(2026, 1, 1)).unwrap();

        assert!(snap.state.is_absent());
        assert_eq!(snap.state.amount, None);
        assert_eq!(snap.state.as_of, at(2026, 1, 1));
    }

    #[test]
    fn test_history_after_instant_means_absent_not_fallback() {
        let history = history_of(vec![RawChangeRecord::new(
            "d-1",
            "dealstage",
            "qualification",
            "2026-02-10T00:00:00Z",
        )]);
        let builder = SnapshotBuilder::default();

        let snap = builder.snapshot(&deal(), Some(&history), at(2026, 2, 1)).unwrap();

        assert_eq!(snap.state.stage, None);
        // Amount has no history at all, so it still falls back
        assert_eq!(snap.state.amount, Some(dec(20000)));
    }

    #[test]
    fn test_recorded_values_resolved_per_property() {
        let history = history_of(vec![
            RawChangeRecord::new("d-1", "dealstage", "qualification", "2026-01-15T00:00:00Z"),
            RawChangeRecord::new("d-1", "dealstage", "proposal", "2026-02-10T00:00:00Z"),
            RawChangeRecord::new("d-1", "amount", "15000", "2026-01-15T00:00:00Z"),
            RawChangeRecord::new("d-1", "closedate", "2026-03-31T00:00:00Z", "2026-01-15T00:00:00Z"),
            RawChangeRecord::new("d-1", "hs_deal_stage_probability", "0.4", "2026-02-10T00:00:00Z"),
        ]);
        let builder = SnapshotBuilder::default();

        let snap = builder.snapshot(&deal(), Some(&history), at(2026, 2, 20)).unwrap();

        assert_eq!(snap.state.stage.as_deref(), Some("proposal"));
        assert_eq!(snap.state.stage_since, Some(at(2026, 2, 10)));
        assert_eq!(snap.state.amount, Some(dec(15000)));
        assert_eq!(snap.state.target_close_date, NaiveDate::from_ymd_opt(2026, 3, 31));
        assert_eq!(snap.state.probability, Some(0.4));
    }

    #[test]
    fn test_missing_creation_instant_is_error() {
        let entity = EntitySummary::new("d-9", "No date", None);
        let result = SnapshotBuilder::default().snapshot(&entity, None, at(2026, 1, 1));

        assert!(matches!(result, Err(EngineError::MissingWindow(_))));
    }

    #[test]
    fn test_unparseable_amount_warns() {
        let history = history_of(vec![RawChangeRecord::new(
            "d-1",
            "amount",
            "twenty grand",
            "2026-01-15T00:00:00Z",
        )]);

        let snap = SnapshotBuilder::default()
            .snapshot(&deal(), Some(&history), at(2026, 2, 1))
            .unwrap();

        assert_eq!(snap.state.amount, None);
        assert_eq!(snap.warnings.len(), 1);
        assert_eq!(snap.warnings[0].kind, WarningKind::UnparseableValue);
        assert_eq!(snap.warnings[0].entity_id.as_deref(), Some("d-1"));
    }

    #[test]
    fn test_custom_mapping_without_probability() {
        let mapping = PropertyMapping {
            stage: "phase".to_string(),
            amount: "value".to_string(),
            close_date: "expected_close".to_string(),
            probability: None,
        };
        let history = history_of(vec![
            RawChangeRecord::new("d-1", "phase", "negotiation", "2026-01-20T00:00:00Z"),
            RawChangeRecord::new("d-1", "hs_deal_stage_probability", "0.9", "2026-01-20T00:00:00Z"),
        ]);

        let snap = SnapshotBuilder::new(mapping)
            .snapshot(&deal(), Some(&history), at(2026, 2, 1))
            .unwrap();

        assert_eq!(snap.state.stage.as_deref(), Some("negotiation"));
        assert_eq!(snap.state.probability, None);
    }

    #[test]
    fn test_window_snapshots_for_mid_month_creation() {
        let policy = BoundaryPolicy::default();
        let window = MonthWindow::for_month(MonthKey::new(2026, 1).unwrap(), &policy).unwrap();

        let (start, end) = SnapshotBuilder::default()
            .window_snapshots(&deal(), None, &window)
            .unwrap();

        assert!(start.state.is_absent());
        assert_eq!(end.state.stage.as_deref(), Some("proposal"));
        assert_eq!(end.state.as_of, window.end);
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("20000"), Some(dec(20000)));
        // Lone comma reads as a decimal separator
        assert_eq!(parse_amount("20,5"), Some(Decimal::new(205, 1)));
        assert_eq!(parse_amount("1,234.50"), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_amount("  "), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_parse_probability_bounds() {
        assert_eq!(parse_probability("0.25"), Some(0.25));
        assert_eq!(parse_probability("1"), Some(1.0));
        assert_eq!(parse_probability("40"), None);
        assert_eq!(parse_probability("-0.1"), None);
    }
}
