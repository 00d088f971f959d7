//! # routeplan-core
//!
//! Deterministic virtual-model route planning.
//!
//! This crate turns a provider / virtual model configuration into:
//! - a flat table of concrete routes (one pipeline entry per usable credential)
//! - an assembly table and scheduler policy for an external execution engine
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same configuration always produces the same table
//! 2. **No network calls**: Everything here is a pure function of the input
//! 3. **Partial failure**: A dangling reference drops one target, not the run
//! 4. **Keys stay out of logs**: `ApiKey` redacts itself in `Debug`/`Display`
//!
//! ## Example
//!
//! ```rust,ignore
//! use routeplan_core::{ConfigData, ConversionOptions, RouteFanOut, plan};
//!
//! let config = ConfigData::from_file("routes.yaml")?;
//! let plan = plan(&config, &RouteFanOut::all_keys(), &ConversionOptions::default())?;
//!
//! for (id, entry) in plan.routes.table.iter() {
//!     println!("{} -> {}/{}", id, entry.target_provider, entry.target_model);
//! }
//! ```

pub mod config;
pub mod fanout;
pub mod fingerprint;
pub mod policy;
pub mod secrets;
pub mod types;
pub mod validator;

// Re-export main types at crate root
pub use config::{
    load_document, parse_config, save_document, substitute_env, validate_structure, LoadError,
    ParseError,
};
pub use fanout::{FanOutError, FanOutReport, FanOutStrategy, RouteFanOut};
pub use fingerprint::AssemblyFingerprint;
pub use policy::{
    merge_one_level, recompute_weights, AssemblyConfig, ConversionError, ConversionOptions,
    ConversionOutput, PolicyConverter, SchedulerConfig,
};
pub use secrets::ApiKey;
pub use types::{
    entry_id, ConfigData, EntryMetadata, ModelConfig, PipelineEntry, PipelineTable,
    ProviderAuth, ProviderConfig, VirtualModelConfig, VirtualModelTarget,
};
pub use validator::{ReferenceValidator, ValidationReport, STANDARD_VIRTUAL_MODELS};

/// Everything derived from one configuration.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub validation: ValidationReport,
    pub routes: FanOutReport,
    pub policy: ConversionOutput,
}

/// Validate, fan out and convert a configuration in one pass.
///
/// Validation findings are reported, not enforced; callers decide whether an
/// invalid plan may be activated.
pub fn plan(
    config: &ConfigData,
    fan_out: &RouteFanOut,
    options: &ConversionOptions,
) -> Result<RoutePlan, ConversionError> {
    plan_with(&ReferenceValidator::new(), config, fan_out, options)
}

/// [`plan`] with an explicit validator.
pub fn plan_with(
    validator: &ReferenceValidator,
    config: &ConfigData,
    fan_out: &RouteFanOut,
    options: &ConversionOptions,
) -> Result<RoutePlan, ConversionError> {
    let validation = validator.validate(config);
    let routes = fan_out.generate(config);
    let policy = PolicyConverter::new().convert(config, options)?;

    tracing::info!(
        valid = validation.valid,
        entries = routes.table.len(),
        templates = policy.assembly_config.pipeline_templates.len(),
        "Planned routes"
    );

    Ok(RoutePlan {
        validation,
        routes,
        policy,
    })
}
