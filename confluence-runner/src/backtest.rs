//! Backtest replay: every configured symbol on one merged timeline.
//!
//! Indicator series are computed up front in parallel. The replay itself is
//! sequential: at each timestamp, exits first, then signals in symbol order, then
//! mark-to-market. No bar after the current timestamp is ever visible.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use confluence_core::domain::{Bar, Trade};
use confluence_core::engine::{EquityPoint, Simulator};
use confluence_core::indicators::IndicatorSeries;
use confluence_core::ConfigError;

use crate::config::{PipelineConfig, RunId};
use crate::ledger::{Ledger, LedgerError};
use crate::market_data::{MarketData, MarketDataError};
use crate::metrics::{PerformanceAnalyzer, PerformanceReport};
use crate::pipeline::{DecisionPipeline, MarketView, PipelineError, TradingState};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("market data: {0}")]
    Data(#[from] MarketDataError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("fingerprinting config: {0}")]
    RunId(#[from] serde_json::Error),
    #[error("no bars for any configured symbol")]
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub run_id: RunId,
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bar_count: usize,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub report: PerformanceReport,
    /// Decision outcomes by kind, over every (symbol, bar) pair.
    pub decisions: BTreeMap<String, usize>,
    pub final_cash: f64,
    pub max_drawdown_pct: f64,
}

struct SymbolFeed {
    symbol: String,
    bars: Vec<Bar>,
    higher: Vec<Bar>,
    series: IndicatorSeries,
    /// Bars with index < cursor are visible.
    cursor: usize,
    higher_cursor: usize,
}

/// Replay `config.symbols` from `data` through a fresh simulator.
pub fn run_backtest(
    config: &PipelineConfig,
    data: &dyn MarketData,
    ledger: Box<dyn Ledger>,
) -> Result<BacktestResult, RunError> {
    let pipeline = DecisionPipeline::new(config)?;
    let run_id = config.run_id()?;
    let timeframe = pipeline.timeframe();

    let mut loaded = Vec::with_capacity(config.symbols.len());
    for symbol in &config.symbols {
        let bars = data.history(symbol, timeframe)?;
        let higher = match timeframe.higher() {
            Some(h) if config.scheduling.use_higher_timeframe => match data.history(symbol, h) {
                Ok(bars) => bars,
                Err(MarketDataError::NotFound { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            },
            _ => Vec::new(),
        };
        loaded.push((symbol.clone(), bars, higher));
    }

    let mut feeds: Vec<SymbolFeed> = loaded
        .into_par_iter()
        .map(|(symbol, bars, higher)| {
            let series = pipeline.compute(&bars);
            SymbolFeed {
                symbol,
                bars,
                higher,
                series,
                cursor: 0,
                higher_cursor: 0,
            }
        })
        .collect();

    let timeline: BTreeSet<DateTime<Utc>> = feeds
        .iter()
        .flat_map(|f| f.bars.iter().map(|b| b.timestamp))
        .collect();
    let (Some(&start), Some(&end)) = (timeline.first(), timeline.last()) else {
        return Err(RunError::NoData);
    };

    let simulator = Simulator::new(config.simulator_config())?;
    let mut state = TradingState::new(simulator, ledger, start)?;
    let mut decisions: BTreeMap<String, usize> = BTreeMap::new();
    let step = timeframe.duration();
    let higher_step = timeframe.higher().map_or(step, |h| h.duration());
    info!(%run_id, symbols = feeds.len(), bars = timeline.len(), "backtest started");

    for &now in &timeline {
        // `due` marks symbols with a bar exactly at `now`. A higher-timeframe bar
        // becomes visible once it has closed.
        let mut due = Vec::with_capacity(feeds.len());
        for feed in feeds.iter_mut() {
            let at_now = feed.bars.get(feed.cursor).is_some_and(|b| b.timestamp == now);
            if at_now {
                feed.cursor += 1;
            }
            while feed
                .higher
                .get(feed.higher_cursor)
                .is_some_and(|b| b.timestamp + higher_step <= now + step)
            {
                feed.higher_cursor += 1;
            }
            due.push(at_now);
        }

        let mut view = MarketView::new(now);
        for feed in &feeds {
            if feed.cursor > 0 {
                view.bars.insert(feed.symbol.clone(), &feed.bars[..feed.cursor]);
            }
            if feed.higher_cursor > 0 {
                view.higher
                    .insert(feed.symbol.clone(), &feed.higher[..feed.higher_cursor]);
            }
        }

        for (feed, _) in feeds.iter().zip(&due).filter(|(_, d)| **d) {
            let bar = &feed.bars[feed.cursor - 1];
            pipeline.process_exits(&mut state, &feed.symbol, bar)?;
        }
        for (feed, _) in feeds.iter().zip(&due).filter(|(_, d)| **d) {
            let index = feed.cursor - 1;
            let signal =
                pipeline.raw_signal(&feed.symbol, &feed.bars, &feed.series, index, now);
            let decision = pipeline.process(&mut state, &view, &feed.symbol, signal)?;
            *decisions.entry(decision.kind().to_string()).or_insert(0) += 1;
        }
        pipeline.end_of_bar(&mut state, now)?;
    }

    if config.scheduling.close_at_end {
        pipeline.close_session(&mut state, end)?;
        pipeline.end_of_bar(&mut state, end)?;
    }

    let sim = &state.simulator;
    let report =
        PerformanceAnalyzer::new(config.simulator.initial_capital).analyze(sim.trades());
    info!(
        %run_id,
        trades = report.trade_count,
        total_return = report.total_return,
        max_drawdown = sim.max_drawdown_pct(),
        "backtest finished"
    );

    Ok(BacktestResult {
        run_id,
        symbols: feeds.iter().map(|f| f.symbol.clone()).collect(),
        start,
        end,
        bar_count: timeline.len(),
        trades: sim.trades().to_vec(),
        equity_curve: sim.equity_curve().to_vec(),
        report,
        decisions,
        final_cash: sim.cash(),
        max_drawdown_pct: sim.max_drawdown_pct(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::ledger::InMemoryLedger;
    use crate::market_data::InMemoryMarketData;
    use crate::synthetic::synthetic_market;
    use chrono::TimeZone;
    use confluence_core::domain::Timeframe;

    fn config(dir: &std::path::Path) -> PipelineConfig {
        let mut cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        cfg.safety.emergency_stop_file = dir.join("EMERGENCY_STOP");
        cfg.safety.emergency_stop_env = "CONFLUENCE_BACKTEST_UNIT_STOP".into();
        cfg
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn missing_symbol_is_a_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = InMemoryMarketData::new();
        let err = run_backtest(&config(dir.path()), &data, Box::new(InMemoryLedger::new()));
        assert!(matches!(err, Err(RunError::Data(MarketDataError::NotFound { .. }))));
    }

    #[test]
    fn every_bar_gets_one_decision() {
        let dir = tempfile::tempdir().unwrap();
        let data = synthetic_market(&["BTCUSDT", "ETHUSDT"], Timeframe::H1, t0(), 300);
        let result =
            run_backtest(&config(dir.path()), &data, Box::new(InMemoryLedger::new())).unwrap();
        assert_eq!(result.bar_count, 300);
        assert_eq!(result.decisions.values().sum::<usize>(), 600);
        assert_eq!(result.equity_curve.len(), 301);
        assert_eq!(result.report.trade_count, result.trades.len());
        // flat at the end
        let pnl: f64 = result.trades.iter().map(|t| t.realized_pnl).sum();
        assert!((result.final_cash - (10_000.0 + pnl)).abs() < 1e-6);
    }
}
