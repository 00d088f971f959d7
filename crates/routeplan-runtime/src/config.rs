//! Runtime configuration.
//!
//! Durations are human-readable strings (`"5m"`, `"30s"`).

use routeplan_core::{FanOutStrategy, ReferenceValidator, RouteFanOut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_MAX_ENTRIES;

/// Errors from loading runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid runtime config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid runtime config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid runtime config: {0}")]
    Invalid(String),
}

/// Settings for a route manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RuntimeConfig {
    /// Refuse to activate configurations with validation errors
    pub require_valid: bool,

    /// Virtual models a configuration must define
    pub required_virtual_models: Vec<String>,

    pub strategy: FanOutStrategyConfig,

    pub cache: CacheConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            require_valid: true,
            required_virtual_models: Vec::new(),
            strategy: FanOutStrategyConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("cache.sweep_interval must be positive".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive".to_string()));
        }
        Ok(())
    }

    pub fn validator(&self) -> ReferenceValidator {
        ReferenceValidator::new().with_required(self.required_virtual_models.iter().cloned())
    }
}

/// Which fan-out strategy the manager runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutStrategyConfig {
    pub kind: FanOutStrategy,

    /// Allow-list for `declared-key`; empty means the standard virtual models
    pub allowed_virtual_models: Vec<String>,
}

impl Default for FanOutStrategyConfig {
    fn default() -> Self {
        Self {
            kind: FanOutStrategy::AllKeys,
            allowed_virtual_models: Vec::new(),
        }
    }
}

impl FanOutStrategyConfig {
    pub fn fan_out(&self) -> RouteFanOut {
        RouteFanOut::with_strategy(self.kind, &self.allowed_virtual_models)
    }
}

/// Assembly cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,

    #[serde(with = "humantime_duration")]
    pub sweep_interval: Duration,

    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
