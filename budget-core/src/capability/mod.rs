pub mod cache;
pub mod resolver;

pub use cache::CapabilityCache;
pub use resolver::{candidate_names, resolve, CapabilityResolver, Resolved, ResolverSettings};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const BUILTIN_DATASET: &str = include_str!("../../data/model_capabilities.json");

/// Published limits and feature flags for one model. Partial records are
/// legal: older entries only carry the legacy `max_tokens` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl CapabilityRecord {
    pub fn with_max_tokens(max_tokens: u64) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Default::default()
        }
    }

    pub fn with_vision(mut self, supports_vision: bool) -> Self {
        self.supports_vision = supports_vision;
        self
    }

    /// Total context window: the primary field, else its legacy synonym.
    pub fn max_total_tokens(&self) -> Option<u64> {
        self.max_input_tokens.or(self.max_tokens)
    }
}

/// A manually injected entry, merged after the static dataset so it wins
/// any key collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOverride {
    pub key: String,
    #[serde(flatten)]
    pub record: CapabilityRecord,
}

impl CapabilityOverride {
    pub fn new(key: impl Into<String>, record: CapabilityRecord) -> Self {
        Self {
            key: key.into(),
            record,
        }
    }
}

/// Entries for self-hosted models the vendor dataset does not list.
pub fn default_overrides() -> Vec<CapabilityOverride> {
    vec![
        CapabilityOverride::new(
            "ollama/gemma3:27b",
            CapabilityRecord {
                provider: Some("ollama".to_string()),
                ..CapabilityRecord::with_max_tokens(32_000).with_vision(true)
            },
        ),
        CapabilityOverride::new(
            "ollama/gemma3:12b",
            CapabilityRecord {
                provider: Some("ollama".to_string()),
                ..CapabilityRecord::with_max_tokens(16_000).with_vision(true)
            },
        ),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Dataset {
    version: String,
    models: HashMap<String, CapabilityRecord>,
}

/// Immutable mapping from `provider/model` and bare `model` keys to
/// capability records.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    version: String,
    entries: HashMap<String, CapabilityRecord>,
}

impl CapabilityTable {
    pub fn new(version: impl Into<String>, entries: HashMap<String, CapabilityRecord>) -> Self {
        Self {
            version: version.into(),
            entries,
        }
    }

    /// Parses a dataset document: `{"version": .., "models": {key: record}}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let dataset: Dataset = serde_json::from_str(json)?;
        Ok(Self::new(dataset.version, dataset.models))
    }

    /// The dataset embedded at compile time.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_DATASET)
    }

    /// Static dataset plus overrides, overrides last.
    pub fn build(overrides: &[CapabilityOverride]) -> Result<Self> {
        Ok(Self::builtin()?.with_overrides(overrides))
    }

    pub fn with_overrides(mut self, overrides: &[CapabilityOverride]) -> Self {
        for entry in overrides {
            self.entries.insert(entry.key.clone(), entry.record.clone());
        }
        if !overrides.is_empty() {
            self.version = format!("{}+{}", self.version, overrides.len());
        }
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, key: &str) -> Option<&CapabilityRecord> {
        self.entries.get(key)
    }

    pub fn get_key_value(&self, key: &str) -> Option<(&str, &CapabilityRecord)> {
        self.entries
            .get_key_value(key)
            .map(|(key, record)| (key.as_str(), record))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CapabilityRecord)> {
        self.entries.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
