//! File-based configuration for an [`crate::execution::Inspector`] and its loads.
//!
//! Every section and field is optional; missing values take their `Default`.
//!
//! ```toml
//! [limits]
//! max_depth = 16
//! max_elements_per_dim = 1024
//!
//! [stats]
//! percentiles = [50.0, 90.0, 99.0]
//!
//! [execution]
//! num_threads = 4
//! max_concurrent_reads = 2
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::execution::{ExecutionOptions, LoadOptions};
use crate::normalize::Limits;
use crate::stats::StatsOptions;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub limits: Limits,
    pub stats: StatsOptions,
    pub execution: ExecutionOptions,
}

impl InspectorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Load options carrying this config's limits and statistics settings.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            limits: self.limits.clone(),
            stats: self.stats.clone(),
            ..LoadOptions::default()
        }
    }
}
