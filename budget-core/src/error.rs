use crate::context::Role;
use prometheus::Error as MetricsError;
use serde_json::Error as JsonError;
use std::io::Error as IoError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Hard failures. These always reach the caller.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Last turn must be user input or a tool result, got {0}")]
    InvalidLastTurn(Role),

    #[error("History unfittable: {required} tokens required (budget: {budget})")]
    HistoryUnfittable { required: usize, budget: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encoding error: {0}")]
    Encoding(#[source] anyhow::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] JsonError),

    #[error("Config parse error: {0}")]
    Toml(#[from] TomlError),

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Recoverable lookup failures. Fallback APIs absorb these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("No capability entry found for {provider}/{model}")]
    CapabilityNotFound { provider: String, model: String },

    #[error("Capability entry {key} has no {field}")]
    MissingField { key: String, field: &'static str },

    #[error("No pricing available for {provider}/{model}")]
    PricingUnavailable { provider: String, model: String },
}

pub type Result<T> = std::result::Result<T, PromptError>;
