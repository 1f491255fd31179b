//! Advisory indexing cost for contextual retrieval.
//!
//! Volumes assume every chunk is filled to capacity and every document is
//! `document_size` long, and the document summary pass is counted whenever
//! any summarisation runs. The result overestimates more than it
//! underestimates.

use super::pricing::PricingTable;
use crate::observability::MetricsCollector;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Reference-corpus assumptions for the estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingVolumes {
    pub corpus_tokens: u64,
    /// Tokens per embedded chunk.
    pub chunk_size: u64,
    /// Documents up to this size are included whole in each chunk prompt.
    pub document_size: u64,
    pub contextual_prompt_tokens: u64,
    pub document_summary_prompt_tokens: u64,
    /// Output generated per chunk context or document summary.
    pub generated_context_tokens: u64,
    pub use_chunk_summary: bool,
    pub use_document_summary: bool,
}

impl Default for IndexingVolumes {
    fn default() -> Self {
        Self {
            corpus_tokens: 1_000_000,
            chunk_size: 512,
            document_size: 4096,
            contextual_prompt_tokens: 64,
            document_summary_prompt_tokens: 29,
            generated_context_tokens: 100,
            use_chunk_summary: true,
            use_document_summary: true,
        }
    }
}

impl IndexingVolumes {
    /// `(input_tokens, output_tokens)` for one pass over the corpus.
    pub fn estimate_volumes(&self) -> (u64, u64) {
        if !self.use_chunk_summary && !self.use_document_summary {
            return (0, 0);
        }

        let num_chunks = self.corpus_tokens / self.chunk_size.max(1);
        let num_docs = self.corpus_tokens / self.document_size.max(1);

        // Volumes come straight from configuration; saturate instead of
        // overflowing.
        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;

        if self.use_chunk_summary {
            // Each chunk prompt carries the contextual prompt and the whole
            // document; every chunk's own content is an input exactly once.
            let per_chunk = self.contextual_prompt_tokens.saturating_add(self.document_size);
            input_tokens = input_tokens
                .saturating_add(num_chunks.saturating_mul(per_chunk))
                .saturating_add(self.corpus_tokens);
            output_tokens = output_tokens.saturating_add(num_chunks.saturating_mul(self.generated_context_tokens));
        }

        // Long documents get summarised even with only chunk summaries on.
        input_tokens = input_tokens
            .saturating_add(self.corpus_tokens)
            .saturating_add(num_docs.saturating_mul(self.document_summary_prompt_tokens));
        output_tokens = output_tokens.saturating_add(num_docs.saturating_mul(self.generated_context_tokens));

        (input_tokens, output_tokens)
    }
}

pub struct IndexingCostEstimator {
    pricing_table: PricingTable,
    volumes: IndexingVolumes,
    metrics: Option<MetricsCollector>,
}

impl IndexingCostEstimator {
    pub fn new(pricing_table: PricingTable, volumes: IndexingVolumes) -> Self {
        Self {
            pricing_table,
            volumes,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn volumes(&self) -> &IndexingVolumes {
        &self.volumes
    }

    /// USD to index the reference corpus with `model`. Unpriced models cost 0.
    pub fn estimate(&self, provider: &str, model: &str) -> f64 {
        let (input_tokens, output_tokens) = self.volumes.estimate_volumes();
        if input_tokens == 0 && output_tokens == 0 {
            return 0.0;
        }

        match self.pricing_table.get_pricing(provider, model) {
            Ok(pricing) => pricing.cost(input_tokens, output_tokens),
            Err(e) => {
                error!(error = %e, "Failed to price indexing for {}, assuming cost is 0", model);
                if let Some(metrics) = &self.metrics {
                    metrics.record_pricing_fallback();
                }
                0.0
            }
        }
    }
}
