//! Engine configuration
//!
//! Loaded from JSON. Every section and field is optional; missing values
//! take their defaults.

use crate::aggregate::Aggregator;
use crate::error::{BoxfishError, Result};
use crate::request::{Coverage, DomainAggregation};
use crate::scene::SceneSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub aggregation: AggregationConfig,
    pub scenes: SceneConfig,
    pub logging: LoggingConfig,
}

/// Defaults for new requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub row_aggregator: String,
    pub attribute_aggregator: String,
    pub coverage: Coverage,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            row_aggregator: "sum".to_string(),
            attribute_aggregator: "sum".to_string(),
            coverage: Coverage::Contributing,
        }
    }
}

impl AggregationConfig {
    pub fn to_aggregation(&self) -> Result<DomainAggregation> {
        Ok(DomainAggregation {
            row: self.row_aggregator.parse::<Aggregator>()?,
            attribute: self.attribute_aggregator.parse::<Aggregator>()?,
            coverage: self.coverage,
        })
    }
}

/// Defaults for new consumer nodes and attribute scenes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub defaults: SceneSettings,
    pub color_map: String,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            defaults: SceneSettings::default(),
            color_map: "viridis".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level> {
        self.level
            .trim()
            .parse::<Level>()
            .map_err(|_| BoxfishError::Config(format!("unknown log level '{}'", self.level)))
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject operator names and log levels that would fail later
    pub fn validate(&self) -> Result<()> {
        self.aggregation.to_aggregation()?;
        self.logging.level()?;
        if self.scenes.color_map.trim().is_empty() {
            return Err(BoxfishError::Config("color map name is empty".to_string()));
        }
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
