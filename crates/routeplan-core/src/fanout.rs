//! Route fan-out: virtual model targets → pipeline entries.
//!
//! Two strategies exist and callers pick one explicitly:
//!
//! - **all-keys**: every valid target expands to one entry per provider key.
//! - **declared-key**: strict mode for a fixed allow-list of virtual models;
//!   each target yields at most one entry, bound to its declared `keyIndex`.
//!
//! Both are pure functions of the configuration. Dangling references drop
//! the affected target and never fail the whole generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{parse_config, ParseError};
use crate::secrets::ApiKey;
use crate::validator::STANDARD_VIRTUAL_MODELS;
use crate::types::{
    ConfigData, EntryMetadata, PipelineEntry, PipelineTable, ProviderConfig, VirtualModelConfig,
};

/// Errors from route generation.
#[derive(Error, Debug)]
pub enum FanOutError {
    #[error("Malformed configuration: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// How targets expand into entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanOutStrategy {
    /// One entry per key in the provider's key list
    AllKeys,
    /// One entry per target, using the target's declared key index
    DeclaredKey,
}

impl fmt::Display for FanOutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanOutStrategy::AllKeys => write!(f, "all-keys"),
            FanOutStrategy::DeclaredKey => write!(f, "declared-key"),
        }
    }
}

impl FromStr for FanOutStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-keys" => Ok(FanOutStrategy::AllKeys),
            "declared-key" => Ok(FanOutStrategy::DeclaredKey),
            other => Err(format!(
                "Unknown fan-out strategy '{}': expected 'all-keys' or 'declared-key'",
                other
            )),
        }
    }
}

/// Output of a fan-out run.
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    /// Generated entries, keyed by entry id
    pub table: PipelineTable,

    /// Virtual models rejected by the allow-list
    pub warnings: Vec<String>,

    /// Targets that produced no entry (dangling reference, no keys, bad key index)
    pub dropped_targets: usize,
}

/// Priority given to a target when its virtual model has none: earlier targets rank higher.
pub fn positional_priority(target_index: usize) -> u32 {
    let step = u32::try_from(target_index)
        .unwrap_or(u32::MAX)
        .saturating_mul(10);
    100u32.saturating_sub(step).max(1)
}

/// Weight given to each target when its virtual model has none.
pub fn even_weight(target_count: usize) -> u32 {
    let count = u32::try_from(target_count.max(1)).unwrap_or(u32::MAX);
    (100 / count).max(1)
}

/// Expands virtual model targets into pipeline entries.
#[derive(Debug, Clone)]
pub struct RouteFanOut {
    strategy: FanOutStrategy,
    allowed: Option<BTreeSet<String>>,
}

impl RouteFanOut {
    /// Expand every valid target across all of its provider's keys.
    pub fn all_keys() -> Self {
        Self {
            strategy: FanOutStrategy::AllKeys,
            allowed: None,
        }
    }

    /// Strict mode: only `allowed` virtual models, one entry per declared target.
    pub fn declared_key<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            strategy: FanOutStrategy::DeclaredKey,
            allowed: Some(allowed.into_iter().map(Into::into).collect()),
        }
    }

    /// Fan-out for `strategy`. An empty `allowed` under `declared-key` means
    /// the standard virtual models.
    pub fn with_strategy(strategy: FanOutStrategy, allowed: &[String]) -> Self {
        match strategy {
            FanOutStrategy::AllKeys => Self::all_keys(),
            FanOutStrategy::DeclaredKey if allowed.is_empty() => {
                Self::declared_key(STANDARD_VIRTUAL_MODELS.iter().copied())
            }
            FanOutStrategy::DeclaredKey => Self::declared_key(allowed.iter().cloned()),
        }
    }

    pub fn strategy(&self) -> FanOutStrategy {
        self.strategy
    }

    /// Generate the pipeline table for a parsed configuration.
    pub fn generate(&self, config: &ConfigData) -> FanOutReport {
        let mut report = FanOutReport::default();

        for (vm_id, vm) in &config.virtual_models {
            if let Some(allowed) = &self.allowed {
                if !allowed.contains(vm_id) {
                    tracing::warn!(virtual_model = %vm_id, "Virtual model not in allow-list, skipping");
                    report.warnings.push(format!(
                        "Virtual model '{}' is not in the allowed set and was skipped",
                        vm_id
                    ));
                    continue;
                }
            }

            self.expand_virtual_model(config, vm, &mut report);
        }

        tracing::debug!(
            strategy = %self.strategy,
            entries = report.table.len(),
            dropped_targets = report.dropped_targets,
            "Generated pipeline table"
        );

        report
    }

    /// Generate from an untyped document, rejecting malformed shapes.
    pub fn generate_value(&self, document: &Value) -> Result<FanOutReport, FanOutError> {
        let root = match document {
            Value::Null => {
                return Err(FanOutError::MalformedInput(
                    "configuration is null".to_string(),
                ))
            }
            Value::Object(root) => root,
            other => {
                return Err(FanOutError::MalformedInput(format!(
                    "configuration must be an object, got {}",
                    json_type(other)
                )))
            }
        };

        for section in ["providers", "virtualModels"] {
            match root.get(section) {
                None | Some(Value::Object(_)) => {}
                Some(other) => {
                    return Err(FanOutError::MalformedInput(format!(
                        "'{}' must be an object, got {}",
                        section,
                        json_type(other)
                    )))
                }
            }
        }

        let config = parse_config(document)?;
        Ok(self.generate(&config))
    }

    fn expand_virtual_model(
        &self,
        config: &ConfigData,
        vm: &VirtualModelConfig,
        report: &mut FanOutReport,
    ) {
        let weight = vm.weight.unwrap_or_else(|| even_weight(vm.targets.len()));

        for (target_index, target) in vm.targets.iter().enumerate() {
            let priority = vm
                .explicit_priority()
                .unwrap_or_else(|| positional_priority(target_index));

            let Some(provider) = config.provider(&target.provider_id) else {
                drop_target(report, &vm.id, target_index, "unknown provider");
                continue;
            };
            if provider.model(&target.model_id).is_none() {
                drop_target(report, &vm.id, target_index, "unknown model");
                continue;
            }
            if provider.auth.keys.is_empty() {
                drop_target(report, &vm.id, target_index, "provider has no keys");
                continue;
            }

            let entry = |key_index: usize, key: &ApiKey| PipelineEntry {
                virtual_model_id: vm.id.clone(),
                target_provider: target.provider_id.clone(),
                target_model: target.model_id.clone(),
                key_index,
                enabled: vm.enabled,
                priority,
                weight,
                metadata: metadata(config, provider, key),
            };

            match self.strategy {
                FanOutStrategy::AllKeys => {
                    for (key_index, key) in provider.auth.keys.iter().enumerate() {
                        insert(report, entry(key_index, key));
                    }
                }
                FanOutStrategy::DeclaredKey => match provider.key(target.key_index) {
                    Some(key) => insert(report, entry(target.key_index, key)),
                    None => drop_target(report, &vm.id, target_index, "key index out of range"),
                },
            }
        }
    }
}

impl Default for RouteFanOut {
    fn default() -> Self {
        Self::all_keys()
    }
}

fn metadata(config: &ConfigData, provider: &ProviderConfig, key: &ApiKey) -> EntryMetadata {
    EntryMetadata {
        provider_type: provider.provider_type.clone(),
        api_key: key.clone(),
        // Configuration time, not wall-clock, so regeneration is idempotent
        created_at: config.updated_at,
    }
}

fn insert(report: &mut FanOutReport, entry: PipelineEntry) {
    if !report.table.insert(entry) {
        tracing::debug!("Duplicate target declaration, keeping first entry");
    }
}

fn drop_target(report: &mut FanOutReport, vm_id: &str, target_index: usize, reason: &str) {
    tracing::debug!(virtual_model = %vm_id, target = target_index, reason, "Dropping target");
    report.dropped_targets += 1;
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
