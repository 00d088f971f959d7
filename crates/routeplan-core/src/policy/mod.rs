//! Policy conversion: configuration → assembly table + scheduler policy.
//!
//! The converter is a pure function of the configuration and the options.
//! Custom overrides are applied last, so they always win over generated values.

mod assembly;
mod merge;
mod scheduler;

pub use assembly::{
    pipeline_id, provider_module_id, rule_id, AssemblyConfig, BaseConfig, ModelCapabilities,
    ModuleAssembly, ModuleRegistration, ModuleSlot, ModuleType, PipelineSelection,
    PipelineTemplate, RoutingRule, RuleCondition, COMPATIBILITY_MODULE_ID,
};
pub use merge::merge_one_level;
pub use scheduler::{
    recompute_weights, AutoRecovery, BackoffKind, BasicConfig, ErrorAction, ErrorClassPolicy,
    ErrorHandlingPolicy, HealthCheckPolicy, HealthCheckStrategy, HealthThresholds,
    LoadBalancingPolicy, MonitoringPolicy, PerformancePolicy, SchedulerConfig, SecurityPolicy,
    SectionToggles,
};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::ConfigData;

/// Errors from policy conversion.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("customOverrides must be an object with optional 'assemblyConfig' / 'schedulerConfig' keys")]
    InvalidOverridesShape,

    #[error("Override for '{document}' produced an invalid document: {source}")]
    InvalidOverride {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize generated document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Conversion switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionOptions {
    pub include_health_checks: bool,
    pub include_error_handling: bool,
    pub include_performance: bool,
    pub include_monitoring: bool,
    pub include_security: bool,

    /// `{assemblyConfig?: {...}, schedulerConfig?: {...}}`, merged last
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_overrides: Option<Value>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            include_health_checks: true,
            include_error_handling: true,
            include_performance: true,
            include_monitoring: true,
            include_security: true,
            custom_overrides: None,
        }
    }
}

impl ConversionOptions {
    fn toggles(&self) -> SectionToggles {
        SectionToggles {
            health_checks: self.include_health_checks,
            error_handling: self.include_error_handling,
            performance: self.include_performance,
            monitoring: self.include_monitoring,
            security: self.include_security,
        }
    }
}

/// Provenance and counts of a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionMetadata {
    pub generated_at: DateTime<Utc>,
    pub source_version: String,
    pub source_updated_at: DateTime<Utc>,
    pub virtual_model_count: usize,
    pub provider_count: usize,
    pub routing_rule_count: usize,
    pub template_count: usize,
    pub module_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    pub assembly_config: AssemblyConfig,
    pub scheduler_config: SchedulerConfig,
    pub metadata: ConversionMetadata,
}

/// Derives the assembly table and scheduler policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyConverter;

impl PolicyConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn convert(
        &self,
        config: &ConfigData,
        options: &ConversionOptions,
    ) -> Result<ConversionOutput, ConversionError> {
        self.convert_at(config, options, Utc::now())
    }

    /// Convert with an explicit generation timestamp.
    pub fn convert_at(
        &self,
        config: &ConfigData,
        options: &ConversionOptions,
        generated_at: DateTime<Utc>,
    ) -> Result<ConversionOutput, ConversionError> {
        let mut assembly_config = AssemblyConfig::from_config(config);
        let mut scheduler_config = SchedulerConfig::build(
            &config.version,
            &assembly_config.pipeline_templates,
            options.toggles(),
        );

        if let Some(overrides) = &options.custom_overrides {
            let overrides = overrides
                .as_object()
                .ok_or(ConversionError::InvalidOverridesShape)?;
            if let Some(patch) = overrides.get("assemblyConfig") {
                assembly_config = apply_override(&assembly_config, patch, "assemblyConfig")?;
                // weights follow the templates that will actually ship
                scheduler_config.refresh_weights(&assembly_config.pipeline_templates);
            }
            if let Some(patch) = overrides.get("schedulerConfig") {
                scheduler_config = apply_override(&scheduler_config, patch, "schedulerConfig")?;
            }
        }

        let metadata = ConversionMetadata {
            generated_at,
            source_version: config.version.clone(),
            source_updated_at: config.updated_at,
            virtual_model_count: config.virtual_models.len(),
            provider_count: config.providers.len(),
            routing_rule_count: assembly_config.routing_rules.len(),
            template_count: assembly_config.pipeline_templates.len(),
            module_count: assembly_config.module_registry.len(),
        };

        tracing::debug!(
            rules = metadata.routing_rule_count,
            templates = metadata.template_count,
            modules = metadata.module_count,
            "Converted configuration to policy"
        );

        Ok(ConversionOutput {
            assembly_config,
            scheduler_config,
            metadata,
        })
    }
}

fn apply_override<T>(document: &T, patch: &Value, name: &'static str) -> Result<T, ConversionError>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(document)?;
    merge_one_level(&mut value, patch);
    serde_json::from_value(value).map_err(|source| ConversionError::InvalidOverride {
        document: name,
        source,
    })
}
