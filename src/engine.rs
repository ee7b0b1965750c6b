// 🔄 Analysis Engine - Index → snapshots → classification → KPIs
//
// Stateless between runs: every call builds a fresh index and fresh snapshots.
// Entities are independent, so the per-month pass can fan out across threads
// (feature "parallel"); warnings go to a shared append-only collector and KPIs
// are combined with an order-independent merge.

use crate::config::{AnalysisOptions, EngineConfig};
use crate::error::{EngineError, Warning, WarningCollector};
use crate::history::{ChangeLog, ChangeLogIndex, EntityHistory, IndexStats, RawChangeRecord};
use crate::kpi::{KpiAccumulator, KpiInput, MonthlyKpi};
use crate::movement::{Movement, MovementClassifier};
use crate::snapshot::{EntityState, EntitySummary, PropertyMapping, SnapshotBuilder};
use crate::topology::StageTopology;
use crate::window::{month_range, BoundaryPolicy, MonthKey, MonthWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// ============================================================================
// RESULTS
// ============================================================================

/// One entity's classification for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub entity_id: String,
    pub entity_name: String,
    pub month: MonthKey,
    pub start: EntityState,
    pub end: EntityState,
    pub movement: Movement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthReport {
    pub window: MonthWindow,
    pub movements: Vec<MovementRecord>,
    pub kpi: MonthlyKpi,
}

/// A single (entity, month) request that could not be answered
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
    pub entity_id: String,
    pub month: MonthKey,
    pub error: EngineError,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub months: Vec<MonthReport>,
    pub warnings: Vec<Warning>,
    pub failures: Vec<RequestFailure>,
    pub index_stats: IndexStats,
}

impl AnalysisReport {
    pub fn month(&self, key: MonthKey) -> Option<&MonthReport> {
        self.months.iter().find(|m| m.window.key == key)
    }

    pub fn movement_count(&self) -> usize {
        self.months.iter().map(|m| m.movements.len()).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "run {}: {} month(s), {} movement(s), {} warning(s), {} failure(s)",
            self.run_id,
            self.months.len(),
            self.movement_count(),
            self.warnings.len(),
            self.failures.len()
        )
    }
}

/// What one entity contributes to one month
struct EntityMonth {
    record: Option<MovementRecord>,
    kpi: KpiInput,
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    topology: StageTopology,
    snapshots: SnapshotBuilder,
    classifier: MovementClassifier,
    policy: BoundaryPolicy,
    options: AnalysisOptions,
}

impl AnalysisEngine {
    pub fn new(
        topology: StageTopology,
        mapping: PropertyMapping,
        policy: BoundaryPolicy,
        options: AnalysisOptions,
    ) -> Self {
        AnalysisEngine {
            topology,
            snapshots: SnapshotBuilder::new(mapping),
            classifier: MovementClassifier::new(),
            policy,
            options,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::new(
            config.build_topology()?,
            config.properties.clone(),
            config.boundaries.clone(),
            config.options.clone(),
        ))
    }

    pub fn topology(&self) -> &StageTopology {
        &self.topology
    }

    /// Windows for `from..=to` under this engine's boundary policy
    pub fn windows(&self, from: MonthKey, to: MonthKey) -> Result<Vec<MonthWindow>, EngineError> {
        month_range(from, to, &self.policy)
    }

    /// Classify one entity for one window.
    ///
    /// Unknown stages and unparseable values are pushed to `warnings`; the
    /// classification is still produced on a best-effort basis.
    pub fn analyze_entity(
        &self,
        entity: &EntitySummary,
        history: Option<&EntityHistory>,
        window: &MonthWindow,
        warnings: &WarningCollector,
    ) -> Result<MovementRecord, EngineError> {
        let (start, end) = self.snapshots.window_snapshots(entity, history, window)?;
        warnings.extend(start.warnings);
        warnings.extend(end.warnings);

        for stage in [&start.state.stage, &end.state.stage].into_iter().flatten() {
            if let Err(err) = self.topology.check(&entity.entity_id, stage) {
                if let Some(warning) = Warning::from_error(&err, Some(&entity.entity_id)) {
                    warnings.push(warning);
                }
            }
        }

        let movement = self.classifier.classify(&start.state, &end.state, &self.topology);

        Ok(MovementRecord {
            entity_id: entity.entity_id.clone(),
            entity_name: entity.name.clone(),
            month: window.key,
            start: start.state,
            end: end.state,
            movement,
        })
    }

    /// None when the entity did not exist yet by the end of the window
    fn entity_month(
        &self,
        entity: &EntitySummary,
        history: Option<&EntityHistory>,
        window: &MonthWindow,
        warnings: &WarningCollector,
    ) -> Result<Option<EntityMonth>, EngineError> {
        if entity.created_at.map_or(false, |created| created > window.end) {
            return Ok(None);
        }

        let record = self.analyze_entity(entity, history, window, warnings)?;
        let unchanged = !record.start.is_absent() && record.start.same_position(&record.end);

        let mut kpi = KpiInput {
            created_in_month: entity.created_within(window),
            created_amount: entity.current.amount,
            category: Some(record.movement.category),
            end_amount: record.end.amount,
        };

        if self.options.skip_unchanged && unchanged {
            kpi.category = None;
            return Ok(Some(EntityMonth { record: None, kpi }));
        }

        Ok(Some(EntityMonth { record: Some(record), kpi }))
    }

    fn analyze_month(
        &self,
        entities: &[EntitySummary],
        log: &ChangeLog,
        window: &MonthWindow,
        warnings: &WarningCollector,
    ) -> (MonthReport, Vec<RequestFailure>) {
        let run = |entity: &EntitySummary| {
            self.entity_month(entity, log.history(&entity.entity_id), window, warnings)
                .map_err(|error| RequestFailure {
                    entity_id: entity.entity_id.clone(),
                    month: window.key,
                    error,
                })
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<Result<Option<EntityMonth>, RequestFailure>> =
            entities.par_iter().map(run).collect();

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Result<Option<EntityMonth>, RequestFailure>> =
            entities.iter().map(run).collect();

        #[cfg(feature = "parallel")]
        let kpi = outcomes
            .par_iter()
            .filter_map(|o| o.as_ref().ok().and_then(Option::as_ref))
            .fold(KpiAccumulator::new, |mut acc, month| {
                acc.add(&month.kpi);
                acc
            })
            .reduce(KpiAccumulator::new, KpiAccumulator::merge);

        #[cfg(not(feature = "parallel"))]
        let kpi = outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok().and_then(Option::as_ref))
            .fold(KpiAccumulator::new(), |mut acc, month| {
                acc.add(&month.kpi);
                acc
            });

        let mut movements = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Some(EntityMonth { record: Some(record), .. })) => movements.push(record),
                Ok(_) => {}
                Err(failure) => {
                    tracing::warn!(
                        entity_id = %failure.entity_id,
                        month = %failure.month,
                        "{}",
                        failure.error
                    );
                    failures.push(failure);
                }
            }
        }

        let kpi = kpi.finish(window.key);
        tracing::debug!(
            month = %window.key,
            movements = movements.len(),
            created = kpi.deals_created_count,
            won = kpi.deals_won_count,
            "month analyzed"
        );

        (
            MonthReport {
                window: window.clone(),
                movements,
                kpi,
            },
            failures,
        )
    }

    /// Analyze an already-built change log
    pub fn analyze_log(
        &self,
        entities: &[EntitySummary],
        log: &ChangeLog,
        windows: &[MonthWindow],
    ) -> AnalysisReport {
        let run_id = Uuid::new_v4();
        let _span = tracing::info_span!("analysis", run_id = %run_id).entered();

        let warnings = WarningCollector::new();
        let mut months = Vec::with_capacity(windows.len());
        let mut failures = Vec::new();

        for window in windows {
            let (report, month_failures) = self.analyze_month(entities, log, window, &warnings);
            months.push(report);
            failures.extend(month_failures);
        }

        let mut all_warnings = log.warnings.clone();
        all_warnings.extend(warnings.snapshot());

        let report = AnalysisReport {
            run_id,
            generated_at: Utc::now(),
            months,
            warnings: all_warnings,
            failures,
            index_stats: log.stats.clone(),
        };

        tracing::info!("{}", report.summary());
        report
    }

    /// Index raw change records and analyze every entity over `windows`
    pub fn analyze<I>(
        &self,
        entities: &[EntitySummary],
        records: I,
        windows: &[MonthWindow],
    ) -> AnalysisReport
    where
        I: IntoIterator<Item = RawChangeRecord>,
    {
        let log = ChangeLogIndex::build(records);
        self.analyze_log(entities, &log, windows)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningKind;
    use crate::movement::MovementCategory;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn engine(options: AnalysisOptions) -> AnalysisEngine {
        let topology = StageTopology::new(
            vec![
                "qualification".to_string(),
                "proposal".to_string(),
                "negotiation".to_string(),
            ],
            vec!["closedwon".to_string()],
            vec!["closedlost".to_string()],
        )
        .unwrap();
        AnalysisEngine::new(topology, PropertyMapping::default(), BoundaryPolicy::default(), options)
    }

    fn key(y: i32, m: u32) -> MonthKey {
        MonthKey::new(y, m).unwrap()
    }

    fn entity(id: &str, y: i32, m: u32, d: u32) -> EntitySummary {
        EntitySummary::new(id, &format!("Deal {}", id), Some(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()))
    }

    #[test]
    fn test_entity_created_after_window_is_not_reported() {
        let engine = engine(AnalysisOptions::default());
        let windows = engine.windows(key(2026, 1), key(2026, 2)).unwrap();
        let entities = vec![entity("d-1", 2026, 2, 5).with_stage("qualification")];

        let report = engine.analyze(&entities, Vec::new(), &windows);

        assert!(report.month(key(2026, 1)).unwrap().movements.is_empty());
        let feb = report.month(key(2026, 2)).unwrap();
        assert_eq!(feb.movements.len(), 1);
        assert_eq!(feb.movements[0].movement.category, MovementCategory::New);
        assert_eq!(feb.kpi.deals_created_count, 1);
    }

    #[test]
    fn test_missing_creation_fails_only_that_request() {
        let engine = engine(AnalysisOptions::default());
        let windows = engine.windows(key(2026, 3), key(2026, 3)).unwrap();
        let entities = vec![
            EntitySummary::new("broken", "No date", None).with_stage("proposal"),
            entity("ok", 2026, 1, 10).with_stage("proposal"),
        ];

        let report = engine.analyze(&entities, Vec::new(), &windows);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity_id, "broken");
        assert!(matches!(report.failures[0].error, EngineError::MissingWindow(_)));
        assert_eq!(report.month(key(2026, 3)).unwrap().movements.len(), 1);
    }

    #[test]
    fn test_unknown_stage_is_warned_and_still_classified() {
        let engine = engine(AnalysisOptions::default());
        let windows = engine.windows(key(2026, 2), key(2026, 2)).unwrap();
        let entities = vec![entity("d-1", 2026, 1, 10)];
        let records = vec![
            RawChangeRecord::new("d-1", "dealstage", "qualification", "2026-01-10T00:00:00Z"),
            RawChangeRecord::new("d-1", "dealstage", "mystery", "2026-02-10T00:00:00Z"),
        ];

        let report = engine.analyze(&entities, records, &windows);

        let movement = &report.months[0].movements[0].movement;
        assert_eq!(movement.category, MovementCategory::Stalled);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::UnknownStage);
    }

    #[test]
    fn test_skip_unchanged_keeps_kpis() {
        let engine = engine(AnalysisOptions { skip_unchanged: true });
        let windows = engine.windows(key(2026, 3), key(2026, 3)).unwrap();
        let entities = vec![
            entity("still", 2026, 1, 10).with_stage("proposal").with_amount(Decimal::from(100)),
            entity("fresh", 2026, 3, 10).with_stage("proposal").with_amount(Decimal::from(400)),
        ];

        let report = engine.analyze(&entities, Vec::new(), &windows);
        let march = report.month(key(2026, 3)).unwrap();

        assert_eq!(march.movements.len(), 1);
        assert_eq!(march.movements[0].entity_id, "fresh");
        assert_eq!(march.kpi.deals_created_count, 1);
        assert_eq!(march.kpi.pipeline_generated_total, Decimal::from(400));
        assert_eq!(march.kpi.count(MovementCategory::Stalled), 0);
    }

    #[test]
    fn test_malformed_records_reported_not_fatal() {
        let engine = engine(AnalysisOptions::default());
        let windows = engine.windows(key(2026, 2), key(2026, 2)).unwrap();
        let entities = vec![entity("d-1", 2026, 1, 10)];
        let records = vec![
            RawChangeRecord::new("d-1", "dealstage", "proposal", "not a date"),
            RawChangeRecord::new("d-1", "dealstage", "qualification", "2026-01-10T00:00:00Z"),
        ];

        let report = engine.analyze(&entities, records, &windows);

        assert_eq!(report.index_stats.records_dropped, 1);
        assert!(report.warnings.iter().any(|w| w.kind == WarningKind::MalformedRecord));
        assert_eq!(report.months[0].movements[0].end.stage.as_deref(), Some("qualification"));
    }

    #[test]
    fn test_report_identity_and_summary() {
        let engine = engine(AnalysisOptions::default());
        let windows = engine.windows(key(2026, 1), key(2026, 3)).unwrap();

        let first = engine.analyze(&[], Vec::new(), &windows);
        let second = engine.analyze(&[], Vec::new(), &windows);

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.months.len(), 3);
        assert!(first.summary().contains("3 month(s)"));
    }

    #[test]
    fn test_from_config_rejects_bad_offset() {
        let config = EngineConfig {
            stages: crate::topology::TopologyConfig {
                pipeline_order: vec!["a".to_string()],
                ..Default::default()
            },
            properties: PropertyMapping::default(),
            boundaries: BoundaryPolicy::with_offset("nowhere"),
            options: AnalysisOptions::default(),
        };

        assert!(matches!(AnalysisEngine::from_config(&config), Err(EngineError::InvalidConfig(_))));
    }
}
