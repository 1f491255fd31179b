/// Context window management

use crate::capability::{CapabilityResolver, CapabilityTable};
use crate::config::BudgetConfig;
use crate::context::encoder::Encoder;
use crate::context::token_counter::TokenCounter;
use crate::context::{Conversation, Role, Turn};
use crate::error::{PromptError, Result};
use crate::observability::MetricsCollector;
use std::sync::Arc;
use tracing::{debug, warn};

/// Role and formatting overhead per turn that content tokenization misses.
pub const PER_MESSAGE_OVERHEAD: usize = 7;

/// Drops the oldest history first while keeping the active exchange and, when
/// it fits, the leading System turn.
#[derive(Debug, Clone, Copy)]
pub struct HistoryTruncator {
    per_message_overhead: usize,
}

impl HistoryTruncator {
    pub fn new(per_message_overhead: usize) -> Self {
        Self { per_message_overhead }
    }

    pub fn per_message_overhead(&self) -> usize {
        self.per_message_overhead
    }

    /// Trimmed copy of `turns` that fits in `max_allowed_tokens`.
    pub fn truncate(&self, turns: &[Turn], token_counts: &[usize], max_allowed_tokens: usize) -> Result<Vec<Turn>> {
        let kept = self.select(turns, token_counts, max_allowed_tokens)?;
        Ok(kept.into_iter().map(|i| turns[i].clone()).collect())
    }

    /// Indices of the turns to keep, in original order.
    pub fn select(&self, turns: &[Turn], token_counts: &[usize], max_allowed_tokens: usize) -> Result<Vec<usize>> {
        if turns.is_empty() {
            return Err(PromptError::InvalidInput("no turns to truncate".to_string()));
        }
        if turns.len() != token_counts.len() {
            return Err(PromptError::InvalidInput(format!(
                "{} turns but {} token counts",
                turns.len(),
                token_counts.len()
            )));
        }

        let len = turns.len();
        let cost = |i: usize| token_counts[i] + self.per_message_overhead;

        // The active exchange: the user input, or the assistant call plus its
        // tool result.
        let survivor_start = match turns[len - 1].role {
            Role::User => len - 1,
            Role::Tool => len.saturating_sub(3),
            role => return Err(PromptError::InvalidLastTurn(role)),
        };

        let survivor_cost: usize = (survivor_start..len).map(cost).sum();
        if survivor_cost > max_allowed_tokens {
            return Err(PromptError::HistoryUnfittable {
                required: survivor_cost,
                budget: max_allowed_tokens,
            });
        }
        let mut remaining = max_allowed_tokens - survivor_cost;

        let has_system = survivor_start > 0 && turns[0].role == Role::System;
        let history_start = usize::from(has_system);

        let keep_system = has_system && cost(0) <= remaining;
        if keep_system {
            remaining -= cost(0);
        } else if has_system {
            warn!(
                system_tokens = cost(0),
                remaining, "System turn does not fit the budget, dropping it"
            );
        }

        let mut cut = history_start;
        let mut running = 0;
        for i in (history_start..survivor_start).rev() {
            running += cost(i);
            if running > remaining {
                cut = i + 1;
                break;
            }
        }

        if cut == survivor_start && survivor_start > history_start {
            let newest = cost(survivor_start - 1);
            if newest > max_allowed_tokens {
                return Err(PromptError::HistoryUnfittable {
                    required: newest,
                    budget: max_allowed_tokens,
                });
            }
        }

        let mut kept = Vec::with_capacity(1 + len - cut);
        if keep_system {
            kept.push(0);
        }
        kept.extend(cut..len);

        debug!(
            total = len,
            kept = kept.len(),
            dropped = len - kept.len(),
            "Truncated history"
        );
        Ok(kept)
    }
}

impl Default for HistoryTruncator {
    fn default() -> Self {
        Self::new(PER_MESSAGE_OVERHEAD)
    }
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub turns: Vec<Turn>,
    /// Content tokens plus per-turn overhead of the kept turns.
    pub token_count: usize,
    pub budget: usize,
    pub dropped: usize,
}

/// Counts, budgets and trims a conversation for one model call.
pub struct ContextWindowManager {
    token_counter: TokenCounter,
    truncator: HistoryTruncator,
    resolver: CapabilityResolver,
    reserved_tokens: u64, // Reserve tokens for response
    metrics: Option<MetricsCollector>,
}

impl ContextWindowManager {
    pub fn new(token_counter: TokenCounter, resolver: CapabilityResolver, reserved_tokens: u64) -> Self {
        Self {
            token_counter,
            truncator: HistoryTruncator::default(),
            resolver,
            reserved_tokens,
            metrics: None,
        }
    }

    pub fn from_config(config: &BudgetConfig, table: Arc<CapabilityTable>, encoder: Arc<dyn Encoder>) -> Result<Self> {
        let token_counter = TokenCounter::new(encoder).with_image_tokens(config.image_tokens);
        let resolver = CapabilityResolver::new(table, config.resolver_settings()?);
        Ok(Self::new(token_counter, resolver, config.reserved_output_tokens)
            .with_truncator(HistoryTruncator::new(config.per_message_overhead)))
    }

    pub fn with_truncator(mut self, truncator: HistoryTruncator) -> Self {
        self.truncator = truncator;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.resolver = self.resolver.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &CapabilityResolver {
        &self.resolver
    }

    pub fn token_counter(&self) -> &TokenCounter {
        &self.token_counter
    }

    /// Prompt budget for a model after the output reservation.
    pub fn budget(&self, provider: &str, model: &str) -> usize {
        let tokens = self
            .resolver
            .max_input_tokens(provider, model, self.reserved_tokens);
        usize::try_from(tokens).unwrap_or(usize::MAX)
    }

    /// Manage context window for a model
    pub fn manage_context(&self, conversation: &mut Conversation, provider: &str, model: &str) -> Result<AssembledPrompt> {
        let counts = conversation.token_counts(&self.token_counter)?;
        let budget = self.budget(provider, model);

        let kept = self.truncator.select(&conversation.turns, &counts, budget)?;
        let overhead = self.truncator.per_message_overhead();
        let token_count = kept.iter().map(|&i| counts[i] + overhead).sum();
        let dropped = conversation.turns.len() - kept.len();
        let turns = kept.into_iter().map(|i| conversation.turns[i].clone()).collect();

        if let Some(metrics) = &self.metrics {
            metrics.record_prompt(token_count, dropped);
        }

        Ok(AssembledPrompt {
            turns,
            token_count,
            budget,
            dropped,
        })
    }
}
