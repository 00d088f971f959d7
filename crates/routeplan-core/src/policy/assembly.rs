//! Assembly table: routing rules, pipeline templates and the module registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{ConfigData, ProviderConfig, VirtualModelConfig};

/// Id of the shared compatibility module every template starts with.
pub const COMPATIBILITY_MODULE_ID: &str = "compatibility";

/// Per-request timeout carried by generated templates.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Concurrency cap carried by generated templates.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: u32 = 10;

/// Id of a pipeline's routing rule.
pub fn rule_id(virtual_model_id: &str) -> String {
    format!("{}-rule", virtual_model_id)
}

/// Id of a pipeline template.
pub fn pipeline_id(virtual_model_id: &str) -> String {
    format!("{}-pipeline", virtual_model_id)
}

/// Id of the provider module for a (provider, model) pair.
pub fn provider_module_id(provider_id: &str, model_id: &str) -> String {
    format!("{}-{}", provider_id, model_id)
}

/// Routing and assembly document handed to the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyConfig {
    pub version: String,

    pub routing_rules: Vec<RoutingRule>,

    pub pipeline_templates: Vec<PipelineTemplate>,

    pub module_registry: Vec<ModuleRegistration>,

    /// Keys added by overrides that have no typed field
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl AssemblyConfig {
    /// Build the assembly table for a configuration.
    pub fn from_config(config: &ConfigData) -> Self {
        let routing_rules = config.virtual_models.values().map(RoutingRule::for_virtual_model).collect();
        let pipeline_templates = config
            .virtual_models
            .values()
            .map(PipelineTemplate::for_virtual_model)
            .collect();

        let mut module_registry = vec![ModuleRegistration::compatibility()];
        for provider in config.providers.values() {
            module_registry.extend(ModuleRegistration::for_provider(provider));
        }

        Self {
            version: config.version.clone(),
            routing_rules,
            pipeline_templates,
            module_registry,
            extensions: BTreeMap::new(),
        }
    }

    pub fn template(&self, template_id: &str) -> Option<&PipelineTemplate> {
        self.pipeline_templates.iter().find(|t| t.template_id == template_id)
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleRegistration> {
        self.module_registry.iter().find(|m| m.module_id == module_id)
    }
}

/// Condition matched against an incoming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

/// How a matching rule picks its pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSelection {
    pub strategy: String,
    pub pipeline_ids: Vec<String>,
}

/// Maps requests for one virtual model to its pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub rule_id: String,
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub conditions: Vec<RuleCondition>,
    pub pipeline_selection: PipelineSelection,
}

impl RoutingRule {
    pub fn for_virtual_model(vm: &VirtualModelConfig) -> Self {
        Self {
            rule_id: rule_id(&vm.id),
            name: format!("Route {}", vm.id),
            priority: vm.effective_priority(),
            enabled: vm.enabled,
            conditions: vec![RuleCondition {
                field: "request.model".to_string(),
                operator: "equals".to_string(),
                value: Value::String(vm.id.clone()),
            }],
            pipeline_selection: PipelineSelection {
                strategy: "fixed".to_string(),
                pipeline_ids: vec![pipeline_id(&vm.id)],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseConfig {
    pub timeout_ms: u64,
    pub max_concurrent_requests: u32,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// Ordered module chain of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAssembly {
    pub module_order: Vec<String>,

    /// Per-module settings, keyed by module id
    pub modules: BTreeMap<String, ModuleSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSlot {
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub enabled: bool,
}

/// Blueprint for assembling one virtual model's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTemplate {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub virtual_model_id: String,
    pub priority: u32,
    pub base_config: BaseConfig,
    pub module_assembly: ModuleAssembly,
}

impl PipelineTemplate {
    /// Template from the virtual model's first target.
    ///
    /// Later targets are reached through the pipeline table, not the template.
    /// The provider module is referenced even if the target is dangling.
    pub fn for_virtual_model(vm: &VirtualModelConfig) -> Self {
        let mut module_order = vec![COMPATIBILITY_MODULE_ID.to_string()];
        let mut modules = BTreeMap::new();
        modules.insert(
            COMPATIBILITY_MODULE_ID.to_string(),
            ModuleSlot {
                module_type: ModuleType::Compatibility,
                enabled: true,
            },
        );

        let description = match vm.targets.first() {
            Some(target) => {
                let module_id = provider_module_id(&target.provider_id, &target.model_id);
                modules.insert(
                    module_id.clone(),
                    ModuleSlot {
                        module_type: ModuleType::Provider,
                        enabled: true,
                    },
                );
                module_order.push(module_id);
                format!(
                    "Pipeline for {} via {}/{}",
                    vm.id, target.provider_id, target.model_id
                )
            }
            None => format!("Pipeline for {} (no targets)", vm.id),
        };

        Self {
            template_id: pipeline_id(&vm.id),
            name: format!("{} pipeline", vm.id),
            description,
            virtual_model_id: vm.id.clone(),
            priority: vm.effective_priority(),
            base_config: BaseConfig::default(),
            module_assembly: ModuleAssembly {
                module_order,
                modules,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Compatibility,
    Provider,
}

/// Capabilities advertised by a provider module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,

    pub supports_functions: bool,
}

/// A module the execution engine can instantiate.
///
/// Never carries key material; the engine resolves keys from the pipeline table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRegistration {
    pub module_id: String,

    #[serde(rename = "type")]
    pub module_type: ModuleType,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub key_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ModelCapabilities>,
}

impl ModuleRegistration {
    pub fn compatibility() -> Self {
        Self {
            module_id: COMPATIBILITY_MODULE_ID.to_string(),
            module_type: ModuleType::Compatibility,
            name: "Compatibility adapter".to_string(),
            provider_id: None,
            provider_type: None,
            model_id: None,
            endpoint: None,
            key_count: 0,
            capabilities: None,
        }
    }

    /// One registration per model of the provider, in model id order.
    pub fn for_provider(provider: &ProviderConfig) -> impl Iterator<Item = Self> + '_ {
        provider.models.values().map(move |model| Self {
            module_id: provider_module_id(&provider.id, &model.id),
            module_type: ModuleType::Provider,
            name: format!("{} {}", provider.name, model.name),
            provider_id: Some(provider.id.clone()),
            provider_type: Some(provider.provider_type.clone()),
            model_id: Some(model.id.clone()),
            endpoint: provider.endpoint.clone(),
            key_count: provider.key_count(),
            capabilities: Some(ModelCapabilities {
                context_length: model.context_length,
                supports_functions: model.supports_functions.unwrap_or(false),
            }),
        })
    }
}
