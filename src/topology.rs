// 🧭 Stage Topology - Pipeline order + won/lost partition
//
// Read-only catalogue built once per run and shared by reference.
// A stage is terminal iff it is won or lost; open stages are pipeline members
// that are not terminal. Terminal stages need not have a pipeline position.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type StageId = String;

// ============================================================================
// TOPOLOGY CONFIG (serialized form)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Display names, keyed by stage id
    #[serde(default)]
    pub stage_names: BTreeMap<StageId, String>,

    pub pipeline_order: Vec<StageId>,

    #[serde(default)]
    pub won_stages: Vec<StageId>,

    #[serde(default)]
    pub lost_stages: Vec<StageId>,
}

// ============================================================================
// STAGE TOPOLOGY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTopology {
    pipeline_order: Vec<StageId>,
    positions: HashMap<StageId, usize>,
    won_stages: BTreeSet<StageId>,
    lost_stages: BTreeSet<StageId>,
    stage_names: BTreeMap<StageId, String>,
}

impl StageTopology {
    /// Build and validate a topology.
    ///
    /// Fails when a stage is both won and lost, or when the pipeline order
    /// lists the same stage twice.
    pub fn new(
        pipeline_order: Vec<StageId>,
        won_stages: impl IntoIterator<Item = StageId>,
        lost_stages: impl IntoIterator<Item = StageId>,
    ) -> Result<Self, EngineError> {
        let won_stages: BTreeSet<StageId> = won_stages.into_iter().collect();
        let lost_stages: BTreeSet<StageId> = lost_stages.into_iter().collect();

        if let Some(both) = won_stages.intersection(&lost_stages).next() {
            return Err(EngineError::InvalidTopology(format!(
                "stage '{}' is listed as both won and lost",
                both
            )));
        }

        let mut positions = HashMap::with_capacity(pipeline_order.len());
        for (index, stage) in pipeline_order.iter().enumerate() {
            if stage.trim().is_empty() {
                return Err(EngineError::InvalidTopology(format!(
                    "empty stage id at pipeline position {}",
                    index
                )));
            }
            if positions.insert(stage.clone(), index).is_some() {
                return Err(EngineError::InvalidTopology(format!(
                    "stage '{}' appears twice in pipeline order",
                    stage
                )));
            }
        }

        Ok(StageTopology {
            pipeline_order,
            positions,
            won_stages,
            lost_stages,
            stage_names: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &TopologyConfig) -> Result<Self, EngineError> {
        let topology = Self::new(
            config.pipeline_order.clone(),
            config.won_stages.iter().cloned(),
            config.lost_stages.iter().cloned(),
        )?;
        Ok(topology.with_names(config.stage_names.clone()))
    }

    /// Builder: attach display names
    pub fn with_names(mut self, names: BTreeMap<StageId, String>) -> Self {
        self.stage_names = names;
        self
    }

    pub fn is_won(&self, stage: &str) -> bool {
        self.won_stages.contains(stage)
    }

    pub fn is_lost(&self, stage: &str) -> bool {
        self.lost_stages.contains(stage)
    }

    pub fn is_terminal(&self, stage: &str) -> bool {
        self.is_won(stage) || self.is_lost(stage)
    }

    /// Open = positioned in the pipeline and not terminal
    pub fn is_open(&self, stage: &str) -> bool {
        self.positions.contains_key(stage) && !self.is_terminal(stage)
    }

    pub fn position(&self, stage: &str) -> Option<usize> {
        self.positions.get(stage).copied()
    }

    /// Known = appears anywhere in the catalogue
    pub fn contains(&self, stage: &str) -> bool {
        self.positions.contains_key(stage)
            || self.is_terminal(stage)
            || self.stage_names.contains_key(stage)
    }

    /// Display name, or `[unknown: id]` for stages outside the catalogue
    pub fn stage_name(&self, stage: &str) -> String {
        match self.stage_names.get(stage) {
            Some(name) => name.clone(),
            None if self.contains(stage) => stage.to_string(),
            None => format!("[unknown: {}]", stage),
        }
    }

    pub fn pipeline_order(&self) -> &[StageId] {
        &self.pipeline_order
    }

    pub fn won_stages(&self) -> impl Iterator<Item = &StageId> {
        self.won_stages.iter()
    }

    pub fn lost_stages(&self) -> impl Iterator<Item = &StageId> {
        self.lost_stages.iter()
    }

    /// Check a stage against the catalogue, producing the error the engine downgrades to a warning
    pub fn check(&self, entity_id: &str, stage: &str) -> Result<(), EngineError> {
        if self.contains(stage) {
            Ok(())
        } else {
            Err(EngineError::UnknownStage {
                entity_id: entity_id.to_string(),
                stage: stage.to_string(),
            })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
