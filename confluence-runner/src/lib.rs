//! Confluence Runner: everything around the decision core.
//!
//! This crate builds on `confluence-core` to provide:
//! - TOML pipeline configuration with a content-addressed run id
//! - Ledger persistence (in-memory and JSONL)
//! - Market data collaborators (in-memory, CSV, synthetic random walks)
//! - The decision pipeline with plan, persist, commit semantics
//! - Backtest replay and the concurrent paper-trading scan
//! - Performance analysis of closed trades

pub mod backtest;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod market_data;
pub mod metrics;
pub mod paper;
pub mod pipeline;
pub mod synthetic;

pub use backtest::{run_backtest, BacktestResult, RunError};
pub use config::{ConfigLoadError, PipelineConfig, RunId, SchedulingConfig};
pub use ledger::{InMemoryLedger, JsonlLedger, Ledger, LedgerError, LedgerRecord};
pub use market_data::{resample, CsvMarketData, InMemoryMarketData, MarketData, MarketDataError};
pub use metrics::{PerformanceAnalyzer, PerformanceReport};
pub use paper::{PaperTrader, TickReport};
pub use pipeline::{Decision, DecisionPipeline, MarketView, PipelineError, Prepared, TradingState};
pub use synthetic::{synthetic_bars, synthetic_market, WalkParams};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn pipeline_is_shareable_across_scan_threads() {
        assert_send::<DecisionPipeline>();
        assert_sync::<DecisionPipeline>();
        assert_send::<Prepared>();
    }

    #[test]
    fn trading_state_can_move_behind_a_mutex() {
        assert_send::<TradingState>();
        assert_send::<PaperTrader>();
        assert_sync::<PaperTrader>();
    }

    #[test]
    fn collaborators_are_send_sync() {
        assert_send::<InMemoryMarketData>();
        assert_sync::<InMemoryMarketData>();
        assert_send::<CsvMarketData>();
        assert_sync::<CsvMarketData>();
        assert_send::<JsonlLedger>();
        assert_send::<InMemoryLedger>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<PerformanceReport>();
        assert_sync::<PerformanceReport>();
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }
}
