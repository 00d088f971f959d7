//! Reference validation for parsed configurations.
//!
//! Errors mark a configuration as not ready to activate; warnings describe
//! routes that will be partially dropped by fan-out. Nothing here is
//! thrown: batch validation of many documents must be possible.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::config::{parse_config, validate_structure};
use crate::types::{ConfigData, PRIORITY_RANGE};

/// Virtual model ids every standard deployment is expected to define.
pub const STANDARD_VIRTUAL_MODELS: &[&str] = &[
    "default",
    "longContext",
    "thinking",
    "background",
    "webSearch",
    "vision",
    "coding",
];

/// Result of validating a configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.errors.is_empty();
    }
}

/// Checks that virtual model targets point at existing providers, models and keys.
#[derive(Debug, Clone, Default)]
pub struct ReferenceValidator {
    required_virtual_models: BTreeSet<String>,
}

impl ReferenceValidator {
    /// A validator with no required virtual models.
    pub fn new() -> Self {
        Self::default()
    }

    /// A validator requiring every id in [`STANDARD_VIRTUAL_MODELS`].
    pub fn standard() -> Self {
        Self::new().with_required(STANDARD_VIRTUAL_MODELS.iter().copied())
    }

    /// Replace the required virtual model set.
    pub fn with_required<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_virtual_models = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required_virtual_models
    }

    /// Validate references in a parsed configuration.
    pub fn validate(&self, config: &ConfigData) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for id in &self.required_virtual_models {
            if !config.virtual_models.contains_key(id) {
                errors.push(format!("Required virtual model '{}' is missing", id));
            }
        }

        for (provider_id, provider) in &config.providers {
            if provider.auth.keys.is_empty() {
                warnings.push(format!(
                    "Provider '{}' has no API keys; no routes will be generated for it",
                    provider_id
                ));
            }
            for (model_id, model) in &provider.models {
                if model.context_length == Some(0) {
                    warnings.push(format!(
                        "Model '{}/{}' has contextLength 0; expected a positive integer",
                        provider_id, model_id
                    ));
                }
            }
        }

        for (vm_id, vm) in &config.virtual_models {
            if vm.targets.is_empty() {
                errors.push(format!("Virtual model '{}' has no targets", vm_id));
            }

            if let Some(priority) = vm.priority {
                let accepted =
                    i64::from(*PRIORITY_RANGE.start())..=i64::from(*PRIORITY_RANGE.end());
                if !accepted.contains(&priority) {
                    warnings.push(format!(
                        "Virtual model '{}' has priority {} outside {}-{}",
                        vm_id,
                        priority,
                        PRIORITY_RANGE.start(),
                        PRIORITY_RANGE.end()
                    ));
                }
            }

            for (index, target) in vm.targets.iter().enumerate() {
                let Some(provider) = config.provider(&target.provider_id) else {
                    errors.push(format!(
                        "Virtual model '{}' target {} references unknown provider '{}'",
                        vm_id, index, target.provider_id
                    ));
                    continue;
                };

                if provider.model(&target.model_id).is_none() {
                    warnings.push(format!(
                        "Virtual model '{}' target {} references unknown model '{}' on provider '{}'",
                        vm_id, index, target.model_id, target.provider_id
                    ));
                }

                if !provider.auth.keys.is_empty() && target.key_index >= provider.key_count() {
                    warnings.push(format!(
                        "Virtual model '{}' target {} uses key index {} but provider '{}' has {} key(s)",
                        vm_id,
                        index,
                        target.key_index,
                        target.provider_id,
                        provider.key_count()
                    ));
                }
            }
        }

        ValidationReport::from_findings(errors, warnings)
    }

    /// Validate a raw document: structure first, then references.
    ///
    /// A document that fails to parse yields a report with the parse error
    /// as its only reference finding.
    pub fn validate_document(&self, document: &Value) -> ValidationReport {
        let structural = match validate_structure(document) {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        let mut report = ValidationReport::from_findings(structural, Vec::new());

        match parse_config(document) {
            Ok(config) => report.merge(self.validate(&config)),
            Err(e) => report.merge(ValidationReport::from_findings(vec![e.to_string()], Vec::new())),
        }

        report
    }
}
