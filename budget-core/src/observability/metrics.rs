use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStats {
    pub prompts_assembled: u64,
    pub turns_dropped: u64,
    pub capability_fallbacks: u64,
    pub pricing_fallbacks: u64,
}

#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    prompts_assembled: IntCounter,
    turns_dropped: IntCounter,
    capability_fallbacks: IntCounter,
    pricing_fallbacks: IntCounter,
    prompt_tokens: Histogram,
}

impl MetricsCollector {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let prompts_assembled = IntCounter::with_opts(
            Opts::new("budget_prompts_assembled_total", "Prompts assembled within budget")
                .const_label("component", "budget"),
        )?;

        let turns_dropped = IntCounter::with_opts(Opts::new(
            "budget_turns_dropped_total",
            "Conversation turns dropped by history truncation",
        ))?;

        let capability_fallbacks = IntCounter::with_opts(Opts::new(
            "budget_capability_fallbacks_total",
            "Capability lookups answered by the fallback constant",
        ))?;

        let pricing_fallbacks = IntCounter::with_opts(Opts::new(
            "budget_pricing_fallbacks_total",
            "Cost estimates for unpriced models",
        ))?;

        let prompt_tokens = Histogram::with_opts(
            HistogramOpts::new("budget_prompt_tokens", "Tokens in assembled prompts").buckets(vec![
                256.0, 1024.0, 4096.0, 8192.0, 16384.0, 32768.0, 65536.0, 131072.0, 262144.0,
            ]),
        )?;

        registry.register(Box::new(prompts_assembled.clone()))?;
        registry.register(Box::new(turns_dropped.clone()))?;
        registry.register(Box::new(capability_fallbacks.clone()))?;
        registry.register(Box::new(pricing_fallbacks.clone()))?;
        registry.register(Box::new(prompt_tokens.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            prompts_assembled,
            turns_dropped,
            capability_fallbacks,
            pricing_fallbacks,
            prompt_tokens,
        })
    }

    pub fn record_prompt(&self, token_count: usize, dropped: usize) {
        self.prompts_assembled.inc();
        self.turns_dropped.inc_by(dropped as u64);
        self.prompt_tokens.observe(token_count as f64);
    }

    pub fn record_capability_fallback(&self) {
        self.capability_fallbacks.inc();
    }

    pub fn record_pricing_fallback(&self) {
        self.pricing_fallbacks.inc();
    }

    /// Prometheus text exposition format.
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn get_stats(&self) -> BudgetStats {
        BudgetStats {
            prompts_assembled: self.prompts_assembled.get(),
            turns_dropped: self.turns_dropped.get(),
            capability_fallbacks: self.capability_fallbacks.get(),
            pricing_fallbacks: self.pricing_fallbacks.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_export() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_prompt(1200, 3);
        metrics.record_prompt(800, 0);
        metrics.record_capability_fallback();

        let stats = metrics.get_stats();
        assert_eq!(stats.prompts_assembled, 2);
        assert_eq!(stats.turns_dropped, 3);
        assert_eq!(stats.capability_fallbacks, 1);
        assert_eq!(stats.pricing_fallbacks, 0);

        let text = metrics.export().unwrap();
        assert!(text.contains("budget_turns_dropped_total 3"));
        assert!(text.contains("budget_prompt_tokens_count 2"));
    }
}
