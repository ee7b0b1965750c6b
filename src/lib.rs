// Deal Timeline - Core Library
// Point-in-time reconstruction of entity history, monthly movement classification and KPIs

pub mod error;      // Error taxonomy + warning collector
pub mod timestamps; // Instant / date parsing
pub mod topology;   // Stage catalogue: pipeline order, won/lost sets
pub mod history;    // Change Log Index
pub mod resolver;   // Time-Travel Resolver
pub mod window;     // Month windows + boundary policy
pub mod snapshot;   // Snapshot Builder
pub mod movement;   // Movement Classifier
pub mod kpi;        // KPI Aggregator
pub mod config;     // Engine configuration (JSON)
pub mod engine;     // Analysis run orchestration
pub mod store;      // CSV in/out

// Re-export commonly used types
pub use error::{EngineError, Warning, WarningCollector, WarningKind};
pub use timestamps::{parse_date, parse_instant};
pub use topology::{StageId, StageTopology, TopologyConfig};
pub use history::{
    ChangeLog, ChangeLogIndex, EntityHistory, IndexStats,
    PropertyChangeRecord, RawChangeRecord,
};
pub use resolver::{changes_between, record_at, value_at};
pub use window::{month_of, month_range, BoundaryPolicy, MonthKey, MonthWindow};
pub use snapshot::{
    CurrentState, EntityState, EntitySummary, PropertyMapping,
    Snapshot, SnapshotBuilder,
};
pub use movement::{
    default_rules, Movement, MovementCategory, MovementClassifier, MovementRule,
};
pub use kpi::{aggregate, KpiAccumulator, KpiInput, MonthlyKpi};
pub use config::{AnalysisOptions, EngineConfig};
pub use engine::{
    AnalysisEngine, AnalysisReport, MonthReport, MovementRecord, RequestFailure,
};
pub use store::{
    load_entities_csv, load_history_csv, write_kpis_csv, write_movements_csv, EntityLoad,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
