//! Settings file shared by every `figuras` command.
//!
//! ```yaml
//! engine:
//!   dedup_threshold: 0.5
//!   chunking: { max_chars: 8000, overlap_chars: 400 }
//! batch:
//!   model: gpt-5
//!   reasoning_effort: medium
//! budget:
//!   max_usd: 25.0
//!   output_tokens_per_request: 1500
//! sample:
//!   by: year
//!   fraction: 10
//!   rounding: floor
//! ```
//!
//! Every section and field is optional.

use figuras_core::{ConfigError, EngineConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::batch::BatchConfig;
use crate::budget::BudgetConfig;
use crate::sample::SampleConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub batch: BatchConfig,
    pub budget: BudgetConfig,
    pub sample: SampleConfig,
}

impl RuntimeConfig {
    /// Parse a config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.batch
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if let Some(max) = self.budget.max_usd {
            if max.is_nan() || max < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "budget.max_usd must be non-negative, got {}",
                    max
                )));
            }
        }

        self.sample.validate().map_err(ConfigError::ValidationError)?;

        if self.budget.price_table().get(&self.batch.model).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "no price known for model '{}'; add it under budget.prices",
                self.batch.model
            )));
        }

        Ok(())
    }
}
