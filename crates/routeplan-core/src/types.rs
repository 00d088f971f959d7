//! Configuration and route types.
//!
//! `ConfigData` is the typed input model produced by the parser.
//! `PipelineEntry` / `PipelineTable` are derived by fan-out and never parsed
//! from user input.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::secrets::ApiKey;

/// Default configuration version when the document omits one.
pub const DEFAULT_CONFIG_VERSION: &str = "1.0.0";

/// Default virtual model priority.
pub const DEFAULT_PRIORITY: u32 = 1;

/// Inclusive priority range accepted without a warning.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Authentication section of a provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderAuth {
    /// Auth scheme (e.g., "apikey", "bearer")
    #[serde(rename = "type")]
    pub auth_type: String,

    /// Ordered keys; the position is the key index used for routing
    pub keys: Vec<ApiKey>,
}

/// A model offered by a provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_functions: Option<bool>,
}

/// An LLM provider with its credentials and models.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,

    pub name: String,

    /// Provider family (e.g., "openai", "anthropic")
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub auth: ProviderAuth,

    pub models: BTreeMap<String, ModelConfig>,
}

impl ProviderConfig {
    /// Look up a model by id.
    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.get(model_id)
    }

    /// Look up a key by index.
    pub fn key(&self, index: usize) -> Option<&ApiKey> {
        self.auth.keys.get(index)
    }

    pub fn key_count(&self) -> usize {
        self.auth.keys.len()
    }
}

/// One concrete target of a virtual model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModelTarget {
    #[serde(alias = "provider_id")]
    pub provider_id: String,

    #[serde(alias = "model_id")]
    pub model_id: String,

    #[serde(default, alias = "key_index")]
    pub key_index: usize,
}

impl VirtualModelTarget {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>, key_index: usize) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            key_index,
        }
    }
}

/// A named routing intent (e.g., "coding", "thinking").
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModelConfig {
    pub id: String,

    /// Targets in declaration order; earlier targets rank higher
    pub targets: Vec<VirtualModelTarget>,

    pub enabled: bool,

    /// Explicit priority as written; may lie outside the accepted range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl VirtualModelConfig {
    /// Create an enabled virtual model with default priority.
    pub fn new(id: impl Into<String>, targets: Vec<VirtualModelTarget>) -> Self {
        Self {
            id: id.into(),
            targets,
            enabled: true,
            priority: None,
            weight: None,
        }
    }

    /// Explicit priority, clamped to at least 1.
    pub fn explicit_priority(&self) -> Option<u32> {
        self.priority
            .map(|p| u32::try_from(p.max(1)).unwrap_or(u32::MAX))
    }

    /// Priority with the default applied.
    pub fn effective_priority(&self) -> u32 {
        self.explicit_priority().unwrap_or(DEFAULT_PRIORITY)
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    pub version: String,

    pub providers: BTreeMap<String, ProviderConfig>,

    pub virtual_models: BTreeMap<String, VirtualModelConfig>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConfigData {
    /// An empty configuration stamped with `now`.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: DEFAULT_CONFIG_VERSION.to_string(),
            providers: BTreeMap::new(),
            virtual_models: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn provider(&self, provider_id: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider_id)
    }

    pub fn virtual_model(&self, id: &str) -> Option<&VirtualModelConfig> {
        self.virtual_models.get(id)
    }

    /// Resolve a target to its provider and model.
    pub fn resolve(&self, target: &VirtualModelTarget) -> Option<(&ProviderConfig, &ModelConfig)> {
        let provider = self.provider(&target.provider_id)?;
        let model = provider.model(&target.model_id)?;
        Some((provider, model))
    }

    /// Refresh `updated_at` before a save.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Total number of (provider, model) pairs.
    pub fn model_count(&self) -> usize {
        self.providers.values().map(|p| p.models.len()).sum()
    }
}

/// Provenance attached to each pipeline entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub provider_type: String,

    pub api_key: ApiKey,

    /// Timestamp of the configuration the entry was generated from
    pub created_at: DateTime<Utc>,
}

/// One fully-resolved, addressable route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEntry {
    pub virtual_model_id: String,

    pub target_provider: String,

    pub target_model: String,

    pub key_index: usize,

    pub enabled: bool,

    pub priority: u32,

    pub weight: u32,

    pub metadata: EntryMetadata,
}

impl PipelineEntry {
    /// Deterministic id built from the four identifying fields.
    pub fn id(&self) -> String {
        entry_id(
            &self.virtual_model_id,
            &self.target_provider,
            &self.target_model,
            self.key_index,
        )
    }
}

/// Build a pipeline entry id.
pub fn entry_id(virtual_model_id: &str, provider_id: &str, model_id: &str, key_index: usize) -> String {
    format!("{}:{}:{}:{}", virtual_model_id, provider_id, model_id, key_index)
}

/// Insertion-ordered map of entry id → pipeline entry.
///
/// Serializes as a JSON object whose keys appear in generation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineTable {
    entries: Vec<PipelineEntry>,
    index: HashMap<String, usize>,
}

impl PipelineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns false (and keeps the first one) on a duplicate id.
    pub fn insert(&mut self, entry: PipelineEntry) -> bool {
        let id = entry.id();
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id, self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn get(&self, id: &str) -> Option<&PipelineEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in generation order.
    pub fn entries(&self) -> &[PipelineEntry] {
        &self.entries
    }

    /// (id, entry) pairs in generation order.
    pub fn iter(&self) -> impl Iterator<Item = (String, &PipelineEntry)> {
        self.entries.iter().map(|e| (e.id(), e))
    }

    /// Entries belonging to one virtual model, in generation order.
    pub fn for_virtual_model(&self, virtual_model_id: &str) -> Vec<PipelineEntry> {
        self.entries
            .iter()
            .filter(|e| e.virtual_model_id == virtual_model_id)
            .cloned()
            .collect()
    }

    /// Virtual models that produced at least one entry.
    pub fn virtual_model_ids(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .map(|e| e.virtual_model_id.clone())
            .collect()
    }
}

impl Serialize for PipelineTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.id(), entry)?;
        }
        map.end()
    }
}
