//! Engine configuration.
//!
//! Thresholds and chunking parameters are read from YAML or JSON and
//! validated before use. Every field has a default, so an empty document
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::evaluate::MatchStrategy;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// How documents are windowed before annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum window length in characters
    pub max_chars: usize,

    /// Characters shared by consecutive windows
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            overlap_chars: 400,
        }
    }
}

/// Parameters of the reconciliation and matching engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum IoU for two same-label spans to be treated as duplicates
    pub dedup_threshold: f64,

    /// Minimum IoU for a prediction to match a golden span
    pub match_threshold: f64,

    /// How eligible prediction/reference pairs are matched
    pub match_strategy: MatchStrategy,

    /// Reject spans whose text differs from the chunk slice
    pub verify_text: bool,

    /// Windowing parameters
    pub chunking: ChunkingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.5,
            match_threshold: 0.5,
            match_strategy: MatchStrategy::Greedy,
            verify_text: false,
            chunking: ChunkingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
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

    /// Validate ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("dedup_threshold", self.dedup_threshold)?;
        check_threshold("match_threshold", self.match_threshold)?;

        if self.chunking.max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.max_chars must be positive".to_string(),
            ));
        }

        if self.chunking.overlap_chars >= self.chunking.max_chars {
            return Err(ConfigError::ValidationError(format!(
                "chunking.overlap_chars ({}) must be lower than chunking.max_chars ({})",
                self.chunking.overlap_chars, self.chunking.max_chars
            )));
        }

        Ok(())
    }
}

fn check_threshold(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )))
    }
}
