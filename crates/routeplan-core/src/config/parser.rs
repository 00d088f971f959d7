//! Configuration parsing from untyped JSON/YAML documents.
//!
//! The parser is the only place that knows about input shapes. Legacy
//! fields are normalized here so the rest of the pipeline sees one
//! canonical `ConfigData`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::secrets::ApiKey;
use crate::types::{
    ConfigData, ModelConfig, ProviderAuth, ProviderConfig, VirtualModelConfig,
    VirtualModelTarget, DEFAULT_CONFIG_VERSION,
};

/// Default provider type when a document omits one.
pub const DEFAULT_PROVIDER_TYPE: &str = "openai";

/// Default auth scheme when a document omits one.
pub const DEFAULT_AUTH_TYPE: &str = "apikey";

/// Errors that can occur when parsing a configuration document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Configuration root must be an object")]
    NotAnObject,

    #[error("Section '{section}' must be an object")]
    InvalidSection { section: &'static str },

    #[error("Invalid timestamp in '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Invalid field '{path}': {message}")]
    InvalidField { path: String, message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Virtual model targets as they may appear in a document.
#[derive(Debug)]
enum TargetShape {
    /// `targets: [{providerId, modelId, keyIndex?}]`
    Current(Vec<VirtualModelTarget>),

    /// `{targetProvider, targetModel, keyIndex?}` on the virtual model itself
    Legacy(LegacyTarget),

    /// Neither shape present
    Missing,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTarget {
    target_provider: String,
    target_model: String,
    #[serde(default)]
    key_index: usize,
}

impl TargetShape {
    fn detect(id: &str, obj: &Map<String, Value>) -> Result<Self, ParseError> {
        if let Some(targets) = obj.get("targets") {
            let targets = Vec::<VirtualModelTarget>::deserialize(targets)
                .map_err(|e| invalid_field(format!("virtualModels.{}.targets", id), e))?;
            return Ok(TargetShape::Current(targets));
        }

        if obj.contains_key("targetProvider") {
            let legacy = LegacyTarget::deserialize(&Value::Object(obj.clone()))
                .map_err(|e| invalid_field(format!("virtualModels.{}", id), e))?;
            return Ok(TargetShape::Legacy(legacy));
        }

        Ok(TargetShape::Missing)
    }

    fn into_targets(self) -> Vec<VirtualModelTarget> {
        match self {
            TargetShape::Current(targets) => targets,
            TargetShape::Legacy(legacy) => vec![VirtualModelTarget::new(
                legacy.target_provider,
                legacy.target_model,
                legacy.key_index,
            )],
            TargetShape::Missing => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVirtualModel {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    weight: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "context_length")]
    context_length: Option<u32>,
    #[serde(default, alias = "supports_functions")]
    supports_functions: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawProvider {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    provider_type: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

/// Parse a configuration document, stamping missing timestamps with the current time.
pub fn parse_config(value: &Value) -> Result<ConfigData, ParseError> {
    parse_config_at(value, Utc::now())
}

/// Parse a configuration document with an explicit "now".
pub fn parse_config_at(value: &Value, now: DateTime<Utc>) -> Result<ConfigData, ParseError> {
    let root = value.as_object().ok_or(ParseError::NotAnObject)?;

    let version = match root.get("version") {
        None | Some(Value::Null) => DEFAULT_CONFIG_VERSION.to_string(),
        Some(Value::String(v)) => v.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(ParseError::InvalidField {
                path: "version".to_string(),
                message: format!("expected a string, got {}", other),
            })
        }
    };

    let providers = section(root, "providers")?
        .map(parse_providers)
        .transpose()?
        .unwrap_or_default();

    let virtual_models = section(root, "virtualModels")?
        .map(parse_virtual_models)
        .transpose()?
        .unwrap_or_default();

    let created_at = parse_timestamp(root, "createdAt", now)?;
    let updated_at = parse_timestamp(root, "updatedAt", now)?;

    tracing::debug!(
        version = %version,
        providers = providers.len(),
        virtual_models = virtual_models.len(),
        "Parsed configuration"
    );

    Ok(ConfigData {
        version,
        providers,
        virtual_models,
        created_at,
        updated_at,
    })
}

impl ConfigData {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(json)?;
        parse_config(&value)
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ParseError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        parse_config(&value)
    }
}

fn section<'a>(
    root: &'a Map<String, Value>,
    name: &'static str,
) -> Result<Option<&'a Map<String, Value>>, ParseError> {
    match root.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ParseError::InvalidSection { section: name }),
    }
}

fn parse_providers(
    raw: &Map<String, Value>,
) -> Result<BTreeMap<String, ProviderConfig>, ParseError> {
    let mut providers = BTreeMap::new();

    for (id, value) in raw {
        let Some(obj) = value.as_object() else {
            tracing::debug!(provider = %id, "Skipping non-object provider entry");
            continue;
        };

        let fields = RawProvider::deserialize(value)
            .map_err(|e| invalid_field(format!("providers.{}", id), e))?;

        let auth_type = obj
            .get("auth")
            .and_then(|a| a.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_AUTH_TYPE)
            .to_string();

        let models = match obj.get("models") {
            Some(Value::Object(models)) => parse_models(id, models)?,
            _ => BTreeMap::new(),
        };

        providers.insert(
            id.clone(),
            ProviderConfig {
                id: id.clone(),
                name: fields.name.unwrap_or_else(|| id.clone()),
                provider_type: fields
                    .provider_type
                    .unwrap_or_else(|| DEFAULT_PROVIDER_TYPE.to_string()),
                endpoint: fields.endpoint,
                auth: ProviderAuth {
                    auth_type,
                    keys: extract_keys(obj),
                },
                models,
            },
        );
    }

    Ok(providers)
}

fn parse_models(
    provider_id: &str,
    raw: &Map<String, Value>,
) -> Result<BTreeMap<String, ModelConfig>, ParseError> {
    let mut models = BTreeMap::new();

    for (id, value) in raw {
        if !value.is_object() {
            tracing::debug!(provider = %provider_id, model = %id, "Skipping non-object model entry");
            continue;
        }

        let fields = RawModel::deserialize(value)
            .map_err(|e| invalid_field(format!("providers.{}.models.{}", provider_id, id), e))?;

        models.insert(
            id.clone(),
            ModelConfig {
                id: id.clone(),
                name: fields.name.unwrap_or_else(|| id.clone()),
                context_length: fields.context_length,
                supports_functions: fields.supports_functions,
            },
        );
    }

    Ok(models)
}

fn parse_virtual_models(
    raw: &Map<String, Value>,
) -> Result<BTreeMap<String, VirtualModelConfig>, ParseError> {
    let mut virtual_models = BTreeMap::new();

    for (id, value) in raw {
        let Some(obj) = value.as_object() else {
            tracing::debug!(virtual_model = %id, "Skipping non-object virtual model entry");
            continue;
        };

        let fields = RawVirtualModel::deserialize(value)
            .map_err(|e| invalid_field(format!("virtualModels.{}", id), e))?;
        let targets = TargetShape::detect(id, obj)?.into_targets();

        virtual_models.insert(
            id.clone(),
            VirtualModelConfig {
                id: id.clone(),
                targets,
                enabled: fields.enabled.unwrap_or(true),
                priority: fields.priority,
                weight: fields.weight,
            },
        );
    }

    Ok(virtual_models)
}

/// Keys come from `auth.keys`, else legacy `api_key`/`apiKey` (string or array).
fn extract_keys(provider: &Map<String, Value>) -> Vec<ApiKey> {
    if let Some(Value::Array(keys)) = provider.get("auth").and_then(|a| a.get("keys")) {
        return string_keys(keys);
    }

    match provider.get("api_key").or_else(|| provider.get("apiKey")) {
        Some(Value::String(key)) if !key.is_empty() => vec![ApiKey::new(key.as_str())],
        Some(Value::Array(keys)) => string_keys(keys),
        _ => Vec::new(),
    }
}

fn string_keys(values: &[Value]) -> Vec<ApiKey> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(ApiKey::new)
        .collect()
}

fn parse_timestamp(
    root: &Map<String, Value>,
    field: &'static str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ParseError> {
    match root.get(field) {
        None | Some(Value::Null) => Ok(now),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| ParseError::InvalidTimestamp {
                field,
                value: s.clone(),
            }),
        // Epoch milliseconds
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| ParseError::InvalidTimestamp {
                field,
                value: n.to_string(),
            }),
        Some(other) => Err(ParseError::InvalidTimestamp {
            field,
            value: other.to_string(),
        }),
    }
}

fn invalid_field(path: String, err: serde_json::Error) -> ParseError {
    ParseError::InvalidField {
        path,
        message: err.to_string(),
    }
}
