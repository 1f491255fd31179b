/// Text -> token sequence adapters

use anyhow::anyhow;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Injectable tokenizer. Errors are not recovered by the counter; they
/// propagate to whoever asked for the count.
pub trait Encoder: Send + Sync {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>>;
}

impl<F> Encoder for F
where
    F: Fn(&str) -> anyhow::Result<Vec<u32>> + Send + Sync,
{
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        self(text)
    }
}

// CoreBPE is immutable once loaded, so one instance serves every thread.
static CL100K: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| tiktoken_rs::cl100k_base().map_err(|e| e.to_string()));

/// General-purpose `cl100k_base` encoding used when the caller injects none.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenEncoder;

impl Encoder for TiktokenEncoder {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let bpe = CL100K
            .as_ref()
            .map_err(|e| anyhow!("cl100k_base unavailable: {}", e))?;
        Ok(bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|token| token as u32)
            .collect())
    }
}

/// Rough approximation: 1 token ≈ 4 characters, rounded up. Token ids are
/// placeholders; only the length is meaningful.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEncoder;

impl Encoder for HeuristicEncoder {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let chars = text.chars().count();
        Ok(vec![0; chars.div_ceil(4)])
    }
}

pub fn default_encoder() -> Arc<dyn Encoder> {
    Arc::new(TiktokenEncoder)
}
