//! Content fingerprints for assembled pipelines.
//!
//! A fingerprint identifies what an external assembler would build for one
//! virtual model. Two tables that route a virtual model identically produce
//! the same fingerprint, whatever their generation timestamp.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::types::PipelineEntry;

const FINGERPRINT_DOMAIN: &[u8] = b"routeplan.assembly-fingerprint.v1\0";

/// Stable BLAKE3 digest of `(virtualModelId, entries)`, rendered as `b3-256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssemblyFingerprint(String);

impl AssemblyFingerprint {
    pub const PREFIX: &'static str = "b3-256:";

    pub fn compute(virtual_model_id: &str, entries: &[PipelineEntry]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);

        hasher.update(&(virtual_model_id.len() as u64).to_le_bytes());
        hasher.update(virtual_model_id.as_bytes());

        // Value maps are sorted, so this rendering is canonical
        let canonical = Value::Array(entries.iter().map(canonical_entry).collect()).to_string();
        hasher.update(&(canonical.len() as u64).to_le_bytes());
        hasher.update(canonical.as_bytes());

        Self(format!("{}{}", Self::PREFIX, hasher.finalize().to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssemblyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_entry(entry: &PipelineEntry) -> Value {
    json!({
        "targetProvider": entry.target_provider,
        "targetModel": entry.target_model,
        "keyIndex": entry.key_index,
        "enabled": entry.enabled,
        "priority": entry.priority,
        "weight": entry.weight,
        "providerType": entry.metadata.provider_type,
        "apiKey": entry.metadata.api_key.expose(),
    })
}
