// 📜 Change Log Index - Raw property changes → per-entity chronology
//
// Input: an unordered, possibly duplicated stream of "property X became V at T".
// Output: per entity, per property, a sequence sorted by (effective_at, ingestion order)
// with redundant re-observations collapsed.
//
// One bad record never blocks the rest: it is dropped and reported as a warning.

use crate::error::{EngineError, Warning};
use crate::timestamps::parse_instant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// RECORDS
// ============================================================================

/// A change record as delivered by the data source, before validation.
/// Field names double as CSV headers for the store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    pub entity_id: String,

    #[serde(rename = "property")]
    pub property_name: String,

    #[serde(default)]
    pub value: String,

    /// Raw timestamp; validated during indexing
    #[serde(rename = "changed_at", default)]
    pub effective_at: Option<String>,

    #[serde(rename = "source", default)]
    pub source_tag: String,
}

impl RawChangeRecord {
    pub fn new(entity_id: &str, property_name: &str, value: &str, effective_at: &str) -> Self {
        RawChangeRecord {
            entity_id: entity_id.to_string(),
            property_name: property_name.to_string(),
            value: value.to_string(),
            effective_at: Some(effective_at.to_string()),
            source_tag: String::new(),
        }
    }

    /// Builder: tag the originating source (CRM UI, integration, import, ...)
    pub fn with_source(mut self, source_tag: &str) -> Self {
        self.source_tag = source_tag.to_string();
        self
    }
}

/// A validated change. Immutable once indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChangeRecord {
    pub entity_id: String,
    pub property_name: String,
    pub value: String,
    pub effective_at: DateTime<Utc>,
    pub source_tag: String,

    /// Position in the input stream; breaks timestamp ties
    pub ingestion_seq: usize,
}

impl PropertyChangeRecord {
    /// SHA-256 over the identifying fields. Two records with the same
    /// fingerprint are the same observation ingested twice.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.entity_id,
            self.property_name,
            self.value,
            self.effective_at.timestamp()
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Validate one raw record
fn normalize(index: usize, raw: RawChangeRecord) -> Result<PropertyChangeRecord, EngineError> {
    let malformed = |reason: String| EngineError::MalformedRecord { index, reason };

    let entity_id = raw.entity_id.trim();
    if entity_id.is_empty() {
        return Err(malformed("empty entity_id".to_string()));
    }

    let property_name = raw.property_name.trim();
    if property_name.is_empty() {
        return Err(malformed(format!("empty property name for entity {}", entity_id)));
    }

    let effective_at = match raw.effective_at.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(malformed(format!(
                "missing effective_at for {}.{}",
                entity_id, property_name
            )))
        }
        Some(ts) => parse_instant(ts).ok_or_else(|| {
            malformed(format!(
                "unparseable effective_at '{}' for {}.{}",
                ts, entity_id, property_name
            ))
        })?,
    };

    Ok(PropertyChangeRecord {
        entity_id: entity_id.to_string(),
        property_name: property_name.to_string(),
        value: raw.value,
        effective_at,
        source_tag: raw.source_tag,
        ingestion_seq: index,
    })
}

// ============================================================================
// ENTITY HISTORY
// ============================================================================

/// All changes for one entity, grouped by property.
///
/// Invariant: every property sequence is sorted by (effective_at, ingestion_seq)
/// and holds no two adjacent records with the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHistory {
    pub entity_id: String,
    properties: BTreeMap<String, Vec<PropertyChangeRecord>>,
}

impl EntityHistory {
    pub fn new(entity_id: &str) -> Self {
        EntityHistory {
            entity_id: entity_id.to_string(),
            properties: BTreeMap::new(),
        }
    }

    /// Sorted changes of one property (empty slice when never recorded)
    pub fn property(&self, name: &str) -> &[PropertyChangeRecord] {
        self.properties.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the property has ever been recorded
    pub fn has_property(&self, name: &str) -> bool {
        !self.property(name).is_empty()
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn record_count(&self) -> usize {
        self.properties.values().map(Vec::len).sum()
    }
}

// ============================================================================
// INDEX
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub records_seen: usize,
    pub records_dropped: usize,
    /// Same entity, property, value and instant seen more than once
    pub exact_duplicates: usize,
    /// Adjacent re-observations of an unchanged value (exact duplicates included)
    pub collapsed_repeats: usize,
    pub entities: usize,
    pub properties: usize,
}

/// Result of indexing: histories plus everything that was dropped along the way
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    pub histories: BTreeMap<String, EntityHistory>,
    pub warnings: Vec<Warning>,
    pub stats: IndexStats,
}

impl ChangeLog {
    pub fn history(&self, entity_id: &str) -> Option<&EntityHistory> {
        self.histories.get(entity_id)
    }
}

pub struct ChangeLogIndex;

impl ChangeLogIndex {
    /// Build per-entity histories. Record position in `records` is its ingestion order.
    pub fn build<I>(records: I) -> ChangeLog
    where
        I: IntoIterator<Item = RawChangeRecord>,
    {
        let mut log = ChangeLog::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (index, raw) in records.into_iter().enumerate() {
            log.stats.records_seen += 1;

            let record = match normalize(index, raw) {
                Ok(record) => record,
                Err(err) => {
                    log.stats.records_dropped += 1;
                    if let Some(warning) = Warning::from_error(&err, None) {
                        tracing::warn!(index, "{}", err);
                        log.warnings.push(warning);
                    }
                    continue;
                }
            };

            // Counted, not dropped: repeats collapse only when adjacent after sorting
            if !seen.insert(record.fingerprint()) {
                log.stats.exact_duplicates += 1;
            }

            log.histories
                .entry(record.entity_id.clone())
                .or_insert_with(|| EntityHistory::new(&record.entity_id))
                .properties
                .entry(record.property_name.clone())
                .or_default()
                .push(record);
        }

        for history in log.histories.values_mut() {
            for changes in history.properties.values_mut() {
                changes.sort_by(|a, b| {
                    a.effective_at
                        .cmp(&b.effective_at)
                        .then(a.ingestion_seq.cmp(&b.ingestion_seq))
                });

                let before = changes.len();
                // dedup_by keeps the earlier record of each run
                changes.dedup_by(|later, earlier| later.value == earlier.value);
                log.stats.collapsed_repeats += before - changes.len();
            }
            log.stats.properties += history.properties.len();
        }
        log.stats.entities = log.histories.len();

        tracing::info!(
            records = log.stats.records_seen,
            dropped = log.stats.records_dropped,
            duplicates = log.stats.exact_duplicates,
            collapsed = log.stats.collapsed_repeats,
            entities = log.stats.entities,
            "change log indexed"
        );

        log
    }
}

// ============================================================================
// TESTS
// ============================================================================
