pub mod capability;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod observability;

pub use capability::{CapabilityCache, CapabilityResolver, CapabilityTable};
pub use config::BudgetConfig;
pub use context::{ContextWindowManager, Conversation, HistoryTruncator, TokenCounter, Turn};
pub use cost::{IndexingCostEstimator, PricingTable};
pub use error::{LookupError, PromptError, Result};
