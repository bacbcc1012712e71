//! Signal generation from market data only.
//!
//! Generators never read portfolio state. Portfolio-aware adjustments belong to the
//! quant overlays that run afterwards.

pub mod confluence;

pub use confluence::{
    Confluence, ConfluenceConfig, ConfluenceGenerator, ConfluenceRule, ConfluenceWeights,
    RuleInput, BUY_RULES, SELL_RULES,
};
