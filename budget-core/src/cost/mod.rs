pub mod calculator;
pub mod pricing;

pub use calculator::{IndexingCostEstimator, IndexingVolumes};
pub use pricing::{ModelPricing, PricingTable};
