//! Model identifier normalisation and capacity derivation.
//!
//! Deployments front models behind proxies that add a path segment
//! (`proxy/gpt-4o`) or append a version tag (`llama3:8b`). Instead of fuzzy
//! matching, a fixed list of spellings is probed in order, provider-qualified
//! first, so the outcome is deterministic.

use super::{CapabilityRecord, CapabilityTable};
use crate::error::{LookupError, PromptError};
use crate::observability::MetricsCollector;
use std::num::NonZeroU64;
use std::sync::Arc;
use tracing::{info, warn};

const REASONING_MODELS: &[&str] = &["o1", "o1-mini", "o3-mini", "deepseek-reasoner", "deepseek-r1"];

/// Share of the total window assumed available for output when a record
/// publishes no output limit.
const OUTPUT_FRACTION_DIVISOR: u64 = 10;

fn strip_leading_segment(model: &str) -> &str {
    model.split_once('/').map_or(model, |(_, rest)| rest)
}

fn strip_tag(model: &str) -> &str {
    model.rsplit_once(':').map_or(model, |(name, _)| name)
}

/// Spellings of `model` to probe, in order: as given, without a leading
/// `prefix/`, without a trailing `:tag`, without both. De-duplicated, empties
/// dropped.
pub fn candidate_names(model: &str) -> Vec<&str> {
    let stripped = strip_leading_segment(model);
    let variants = [model, stripped, strip_tag(model), strip_tag(stripped)];

    let mut names: Vec<&str> = Vec::with_capacity(variants.len());
    for name in variants {
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub key: &'a str,
    pub record: &'a CapabilityRecord,
}

/// First table hit over all candidates as `provider/candidate`, then over the
/// bare candidates.
pub fn resolve<'a>(
    table: &'a CapabilityTable,
    provider: &str,
    model: &str,
) -> Result<Resolved<'a>, LookupError> {
    let names = candidate_names(model);

    let qualified = names
        .iter()
        .find_map(|name| table.get_key_value(&format!("{}/{}", provider, name)));
    let hit = qualified.or_else(|| names.iter().find_map(|name| table.get_key_value(name)));

    hit.map(|(key, record)| Resolved { key, record })
        .ok_or_else(|| LookupError::CapabilityNotFound {
            provider: provider.to_string(),
            model: model.to_string(),
        })
}

const DEFAULT_FALLBACK_MAX_TOKENS: NonZeroU64 = match NonZeroU64::new(4096) {
    Some(tokens) => tokens,
    None => panic!("fallback window must be nonzero"),
};

/// Capacities that never come from the table. Both are nonzero, so every
/// capacity the resolver hands out is positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Operator override; wins over anything in the table.
    pub max_tokens_override: Option<NonZeroU64>,
    pub fallback_max_tokens: NonZeroU64,
}

impl ResolverSettings {
    pub fn new(max_tokens_override: Option<u64>, fallback_max_tokens: u64) -> crate::error::Result<Self> {
        let max_tokens_override = match max_tokens_override {
            Some(tokens) => Some(NonZeroU64::new(tokens).ok_or_else(|| {
                PromptError::InvalidConfig("max_tokens_override must be positive".to_string())
            })?),
            None => None,
        };
        let fallback_max_tokens = NonZeroU64::new(fallback_max_tokens)
            .ok_or_else(|| PromptError::InvalidConfig("fallback_max_tokens must be positive".to_string()))?;

        Ok(Self {
            max_tokens_override,
            fallback_max_tokens,
        })
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_tokens_override: None,
            fallback_max_tokens: DEFAULT_FALLBACK_MAX_TOKENS,
        }
    }
}

#[derive(Clone)]
pub struct CapabilityResolver {
    table: Arc<CapabilityTable>,
    settings: ResolverSettings,
    metrics: Option<MetricsCollector>,
}

impl CapabilityResolver {
    pub fn new(table: Arc<CapabilityTable>, settings: ResolverSettings) -> Self {
        Self {
            table,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn resolve(&self, provider: &str, model: &str) -> Result<Resolved<'_>, LookupError> {
        resolve(&self.table, provider, model)
    }

    /// Table-derived total window, ignoring the operator override.
    pub fn try_max_tokens(&self, provider: &str, model: &str) -> Result<u64, LookupError> {
        let resolved = self.resolve(provider, model)?;
        resolved
            .record
            .max_total_tokens()
            .filter(|tokens| *tokens > 0)
            .ok_or_else(|| LookupError::MissingField {
                key: resolved.key.to_string(),
                field: "max_input_tokens",
            })
    }

    /// Best-effort total window. Never fails: misses are logged and replaced
    /// by the configured fallback.
    pub fn max_tokens(&self, provider: &str, model: &str) -> u64 {
        if let Some(max_tokens) = self.settings.max_tokens_override.map(NonZeroU64::get) {
            info!(max_tokens, "Using max tokens override");
            return max_tokens;
        }

        match self.try_max_tokens(provider, model) {
            Ok(max_tokens) => max_tokens,
            Err(e) => self.fall_back(&e, "max tokens"),
        }
    }

    pub fn try_max_output_tokens(&self, provider: &str, model: &str) -> Result<u64, LookupError> {
        let resolved = self.resolve(provider, model)?;
        let record = resolved.record;

        if let Some(tokens) = record.max_output_tokens.filter(|tokens| *tokens > 0) {
            return Ok(tokens);
        }

        record
            .max_tokens
            .or(record.max_input_tokens)
            .map(|total| total / OUTPUT_FRACTION_DIVISOR)
            .filter(|tokens| *tokens > 0)
            .ok_or_else(|| LookupError::MissingField {
                key: resolved.key.to_string(),
                field: "max_output_tokens",
            })
    }

    /// Published output limit, else a tenth of the total window, else the
    /// fallback. Never fails.
    pub fn max_output_tokens(&self, provider: &str, model: &str) -> u64 {
        match self.try_max_output_tokens(provider, model) {
            Ok(tokens) => tokens,
            Err(e) => self.fall_back(&e, "max output tokens"),
        }
    }

    /// Prompt budget after reserving room for the response. A reservation
    /// that leaves nothing substitutes the fallback.
    pub fn max_input_tokens(&self, provider: &str, model: &str, reserved_output_tokens: u64) -> u64 {
        let max_tokens = self.max_tokens(provider, model);
        match max_tokens.checked_sub(reserved_output_tokens) {
            Some(input_tokens) if input_tokens > 0 => input_tokens,
            _ => self.settings.fallback_max_tokens.get(),
        }
    }

    pub fn supports_image_input(&self, provider: &str, model: &str) -> bool {
        match self.resolve(provider, model) {
            Ok(resolved) => resolved.record.supports_vision,
            Err(e) => {
                warn!(error = %e, "Failed to resolve vision support, assuming none");
                false
            }
        }
    }

    pub fn is_reasoning_model(model: &str) -> bool {
        let model = model.to_lowercase();
        REASONING_MODELS.contains(&model.as_str())
    }

    fn fall_back(&self, error: &LookupError, what: &str) -> u64 {
        let fallback = self.settings.fallback_max_tokens.get();
        warn!(error = %error, fallback, "Failed to get {}, using fallback", what);
        if let Some(metrics) = &self.metrics {
            metrics.record_capability_fallback();
        }
        fallback
    }
}
