//! State store configuration, loaded from YAML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use flowstate_db::ConsistencyChecks;
#[cfg(feature = "rocksdb")]
use flowstate_db::RocksDbConfig;

// ---------------------------------------------------------------------------
// StateConfig
// ---------------------------------------------------------------------------

/// Configuration of one partition's state store.
///
/// ```yaml
/// partition_id: 3
/// consistency_checks:
///   enable_preconditions: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub partition_id: u32,
    pub consistency_checks: ConsistencyChecks,
    /// Tuning for the on-disk store. `None` keeps the RocksDB defaults.
    #[cfg(feature = "rocksdb")]
    pub rocksdb: Option<RocksDbConfig>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            partition_id: 1,
            consistency_checks: ConsistencyChecks::default(),
            #[cfg(feature = "rocksdb")]
            rocksdb: None,
        }
    }
}

impl StateConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Parsing state config")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn with_partition_id(mut self, partition_id: u32) -> Self {
        self.partition_id = partition_id;
        self
    }

    pub fn with_preconditions(mut self, enabled: bool) -> Self {
        self.consistency_checks.enable_preconditions = enabled;
        self
    }
}
