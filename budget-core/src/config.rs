use crate::capability::{default_overrides, CapabilityOverride, ResolverSettings};
use crate::context::token_counter::IMAGE_TOKENS;
use crate::context::window::PER_MESSAGE_OVERHEAD;
use crate::cost::IndexingVolumes;
use crate::error::{PromptError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const ENV_MAX_TOKENS: &str = "PROMPT_BUDGET_MAX_TOKENS";
pub const ENV_FALLBACK_MAX_TOKENS: &str = "PROMPT_BUDGET_FALLBACK_MAX_TOKENS";
pub const ENV_RESERVED_OUTPUT_TOKENS: &str = "PROMPT_BUDGET_RESERVED_OUTPUT_TOKENS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Hard override for a model's total window, regardless of table content.
    pub max_tokens_override: Option<u64>,
    pub fallback_max_tokens: u64,
    pub reserved_output_tokens: u64,
    pub per_message_overhead: usize,
    pub image_tokens: usize,
    /// Extra table entries. Merged after the built-in self-hosted entries,
    /// so a key listed here replaces the built-in one.
    pub capability_overrides: Vec<CapabilityOverride>,
    pub indexing: IndexingVolumes,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens_override: None,
            fallback_max_tokens: 4096,
            reserved_output_tokens: 1024,
            per_message_overhead: PER_MESSAGE_OVERHEAD,
            image_tokens: IMAGE_TOKENS,
            capability_overrides: Vec::new(),
            indexing: IndexingVolumes::default(),
        }
    }
}

impl BudgetConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Applies `PROMPT_BUDGET_*` environment variables on top of the file.
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = parse_var(&lookup, ENV_MAX_TOKENS)? {
            self.max_tokens_override = Some(value);
        }
        if let Some(value) = parse_var(&lookup, ENV_FALLBACK_MAX_TOKENS)? {
            self.fallback_max_tokens = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_RESERVED_OUTPUT_TOKENS)? {
            self.reserved_output_tokens = value;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.resolver_settings()?;
        if self.indexing.chunk_size == 0 || self.indexing.document_size == 0 {
            return Err(PromptError::InvalidConfig(
                "indexing chunk_size and document_size must be positive".to_string(),
            ));
        }
        if self.reserved_output_tokens >= self.fallback_max_tokens {
            warn!(
                reserved = self.reserved_output_tokens,
                fallback = self.fallback_max_tokens,
                "Output reservation exceeds the fallback window"
            );
        }
        Ok(())
    }

    /// Built-in override entries followed by the configured ones.
    pub fn merged_overrides(&self) -> Vec<CapabilityOverride> {
        let mut overrides = default_overrides();
        overrides.extend(self.capability_overrides.iter().cloned());
        overrides
    }

    pub fn resolver_settings(&self) -> Result<ResolverSettings> {
        ResolverSettings::new(self.max_tokens_override, self.fallback_max_tokens)
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PromptError::InvalidConfig(format!("{} is not a token count: {:?}", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = BudgetConfig::from_toml_str("").unwrap();
        assert_eq!(config, BudgetConfig::default());
        assert!(config.capability_overrides.is_empty());
        assert_eq!(config.merged_overrides(), default_overrides());
    }

    #[test]
    fn test_parse_full_file() {
        let config = BudgetConfig::from_toml_str(
            r#"
            max_tokens_override = 16000
            reserved_output_tokens = 2048
            per_message_overhead = 4

            [indexing]
            use_chunk_summary = false

            [[capability_overrides]]
            key = "ollama/qwen2.5:32b"
            max_tokens = 32768
            supports_vision = false
            "#,
        )
        .unwrap();

        assert_eq!(config.max_tokens_override, Some(16000));
        assert_eq!(config.reserved_output_tokens, 2048);
        assert_eq!(config.per_message_overhead, 4);
        assert_eq!(config.fallback_max_tokens, 4096);
        assert!(!config.indexing.use_chunk_summary);
        assert!(config.indexing.use_document_summary);
        assert_eq!(config.capability_overrides.len(), 1);
        assert_eq!(config.capability_overrides[0].record.max_tokens, Some(32768));

        let keys: Vec<String> = config.merged_overrides().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["ollama/gemma3:27b", "ollama/gemma3:12b", "ollama/qwen2.5:32b"]);
    }

    #[test]
    fn test_configured_override_replaces_builtin_entry() {
        let config = BudgetConfig::from_toml_str(
            r#"
            [[capability_overrides]]
            key = "ollama/gemma3:27b"
            max_tokens = 8192
            "#,
        )
        .unwrap();

        let table = crate::capability::CapabilityTable::build(&config.merged_overrides()).unwrap();
        assert_eq!(table.get("ollama/gemma3:27b").and_then(|r| r.max_tokens), Some(8192));
        assert_eq!(table.get("ollama/gemma3:12b").and_then(|r| r.max_tokens), Some(16_000));
    }

    #[test]
    fn test_zero_fallback_rejected() {
        let err = BudgetConfig::from_toml_str("fallback_max_tokens = 0").unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfig(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_MAX_TOKENS, "9000"), (ENV_RESERVED_OUTPUT_TOKENS, " 512 ")]
            .into_iter()
            .collect();
        let mut config = BudgetConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_tokens_override, Some(9000));
        assert_eq!(config.reserved_output_tokens, 512);
        assert_eq!(config.fallback_max_tokens, 4096);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = BudgetConfig::default();
        let err = config
            .apply_vars(|name| (name == ENV_FALLBACK_MAX_TOKENS).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfig(_)));
    }
}
