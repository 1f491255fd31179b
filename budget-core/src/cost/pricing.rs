use crate::capability::{candidate_names, CapabilityTable};
use crate::error::{LookupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ONE_MILLION: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
}

impl ModelPricing {
    pub fn from_per_token(input_cost_per_token: f64, output_cost_per_token: f64) -> Self {
        Self {
            input_price_per_1m: input_cost_per_token * ONE_MILLION,
            output_price_per_1m: output_cost_per_token * ONE_MILLION,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / ONE_MILLION) * self.input_price_per_1m;
        let output_cost = (output_tokens as f64 / ONE_MILLION) * self.output_price_per_1m;
        input_cost + output_cost
    }
}

#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prices published alongside the capability dataset. Entries without an
    /// input price are skipped; a missing output price counts as free.
    pub fn from_capabilities(table: &CapabilityTable) -> Self {
        let prices = table
            .iter()
            .filter_map(|(key, record)| {
                let input = record.input_cost_per_token?;
                let output = record.output_cost_per_token.unwrap_or(0.0);
                Some((key.to_string(), ModelPricing::from_per_token(input, output)))
            })
            .collect();
        Self { prices }
    }

    pub fn builtin() -> Result<Self> {
        Ok(Self::from_capabilities(&CapabilityTable::builtin()?))
    }

    pub fn insert(&mut self, key: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(key.into(), pricing);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Same probing order as capability resolution: `provider/name` over all
    /// spellings, then the bare spellings.
    pub fn get_pricing(&self, provider: &str, model: &str) -> std::result::Result<&ModelPricing, LookupError> {
        let names = candidate_names(model);
        names
            .iter()
            .find_map(|name| self.prices.get(&format!("{}/{}", provider, name)))
            .or_else(|| names.iter().find_map(|name| self.prices.get(*name)))
            .ok_or_else(|| LookupError::PricingUnavailable {
                provider: provider.to_string(),
                model: model.to_string(),
            })
    }

    /// Cost in USD, 0.0 for unpriced models.
    pub fn calculate_cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.get_pricing(provider, model)
            .map(|pricing| pricing.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}
