// ⚙️ Engine Configuration - Loaded once, passed by reference
//
// One JSON document: stage topology, property-name mapping, month boundary
// policy and analysis options. Everything but `stages` has defaults.

use crate::error::EngineError;
use crate::snapshot::PropertyMapping;
use crate::topology::{StageTopology, TopologyConfig};
use crate::window::BoundaryPolicy;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Omit entities whose stage, amount and close date did not change within the month
    #[serde(default)]
    pub skip_unchanged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub stages: TopologyConfig,

    #[serde(default)]
    pub properties: PropertyMapping,

    #[serde(default)]
    pub boundaries: BoundaryPolicy,

    #[serde(default)]
    pub options: AnalysisOptions,
}

impl EngineConfig {
    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_json(&content)
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn build_topology(&self) -> Result<StageTopology, EngineError> {
        StageTopology::from_config(&self.stages)
    }

    /// Check everything that can be checked before a run
    pub fn validate(&self) -> Result<(), EngineError> {
        self.build_topology()?;
        self.boundaries.offset()?;

        let mapping = &self.properties;
        let mut names = vec![
            mapping.stage.as_str(),
            mapping.amount.as_str(),
            mapping.close_date.as_str(),
        ];
        if let Some(probability) = &mapping.probability {
            names.push(probability.as_str());
        }

        let mut seen = HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidConfig("empty property name in mapping".to_string()));
            }
            if !seen.insert(name) {
                return Err(EngineError::InvalidConfig(format!(
                    "property '{}' mapped to more than one field",
                    name
                )));
            }
        }

        Ok(())
    }
}
