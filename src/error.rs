// ⚠️ Error Taxonomy - Failures vs collected warnings
//
// Two kinds of trouble:
// - EngineError: a single request cannot be answered (bad window, bad config)
// - Warning: something was skipped or treated best-effort, analysis continues

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

// ============================================================================
// ENGINE ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A change record could not be parsed or attributed to an entity
    #[error("malformed record #{index}: {reason}")]
    MalformedRecord { index: usize, reason: String },

    /// A resolved stage is not part of the configured topology
    #[error("unknown stage '{stage}' on entity {entity_id}")]
    UnknownStage { entity_id: String, stage: String },

    /// Window bounds are inverted, or the entity has no creation instant
    #[error("missing window: {0}")]
    MissingWindow(String),

    /// Stage topology violates its invariants (e.g. won ∩ lost ≠ ∅)
    #[error("invalid stage topology: {0}")]
    InvalidTopology(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// WARNINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// Change record dropped during indexing
    MalformedRecord,

    /// Stage value not found in the topology
    UnknownStage,

    /// Property value present but not parseable (amount, date, probability)
    UnparseableValue,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::MalformedRecord => "malformed_record",
            WarningKind::UnknownStage => "unknown_stage",
            WarningKind::UnparseableValue => "unparseable_value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub entity_id: Option<String>,
    pub detail: String,
}

impl Warning {
    pub fn new(kind: WarningKind, entity_id: Option<&str>, detail: impl Into<String>) -> Self {
        Warning {
            kind,
            entity_id: entity_id.map(str::to_string),
            detail: detail.into(),
        }
    }

    /// Downgrade a recoverable error into a warning.
    /// Returns None for errors that must be surfaced to the caller.
    pub fn from_error(error: &EngineError, entity_id: Option<&str>) -> Option<Self> {
        let kind = match error {
            EngineError::MalformedRecord { .. } => WarningKind::MalformedRecord,
            EngineError::UnknownStage { .. } => WarningKind::UnknownStage,
            _ => return None,
        };
        Some(Warning::new(kind, entity_id, error.to_string()))
    }

    pub fn summary(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("[{}] {}: {}", self.kind.as_str(), id, self.detail),
            None => format!("[{}] {}", self.kind.as_str(), self.detail),
        }
    }
}

// ============================================================================
// WARNING COLLECTOR
// ============================================================================

/// Append-only, thread-safe sink for warnings.
///
/// Cloning shares the same underlying buffer, so workers on different threads
/// can each hold a handle and push independently.
#[derive(Debug, Clone, Default)]
pub struct WarningCollector {
    warnings: Arc<RwLock<Vec<Warning>>>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, warning: Warning) {
        tracing::warn!(
            kind = warning.kind.as_str(),
            entity_id = warning.entity_id.as_deref().unwrap_or("-"),
            "{}",
            warning.detail
        );
        // A poisoned lock only means another pusher panicked mid-push; the Vec is still valid
        let mut warnings = self.warnings.write().unwrap_or_else(|e| e.into_inner());
        warnings.push(warning);
    }

    pub fn extend<I: IntoIterator<Item = Warning>>(&self, warnings: I) {
        for warning in warnings {
            self.push(warning);
        }
    }

    pub fn len(&self) -> usize {
        self.warnings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out everything collected so far, deduplicated and in a stable order
    pub fn snapshot(&self) -> Vec<Warning> {
        let warnings = self.warnings.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Warning> = warnings.clone();
        out.sort_by(|a, b| {
            (a.kind.as_str(), &a.entity_id, &a.detail).cmp(&(b.kind.as_str(), &b.entity_id, &b.detail))
        });
        out.dedup();
        out
    }
}

// ============================================================================
// TESTS
// ============================================================================
