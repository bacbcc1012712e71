//! Paper trading: periodic scans over live-style data against a simulated account.
//!
//! A scan has two phases. Fetching bars, computing indicators and generating raw
//! signals touches no shared state and runs in parallel across symbols. Everything
//! after that (overlays, sizing, guards, the simulator, the ledger) runs under the
//! state mutex, one symbol at a time, in configured symbol order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{info, warn};

use confluence_core::domain::Trade;
use confluence_core::engine::Simulator;

use crate::backtest::RunError;
use crate::config::PipelineConfig;
use crate::ledger::Ledger;
use crate::market_data::{MarketData, MarketDataError};
use crate::pipeline::{Decision, DecisionPipeline, MarketView, Prepared, TradingState};

/// Outcome of one scan.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub now: DateTime<Utc>,
    pub exits: Vec<Trade>,
    /// One entry per symbol whose data was fetched, in symbol order.
    pub decisions: Vec<(String, Decision)>,
    pub fetch_errors: Vec<(String, String)>,
    pub equity: f64,
    pub open_positions: usize,
}

pub struct PaperTrader {
    config: PipelineConfig,
    pipeline: DecisionPipeline,
    data: Arc<dyn MarketData>,
    state: Arc<Mutex<TradingState>>,
}

impl PaperTrader {
    pub fn new(
        config: PipelineConfig,
        data: Arc<dyn MarketData>,
        ledger: Box<dyn Ledger>,
        now: DateTime<Utc>,
    ) -> Result<Self, RunError> {
        let pipeline = DecisionPipeline::new(&config)?;
        let simulator = Simulator::new(config.simulator_config())?;
        let state = TradingState::new(simulator, ledger, now)?;
        info!(symbols = config.symbols.len(), "paper trader ready");
        Ok(Self {
            config,
            pipeline,
            data,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Shared handle to the session state, for inspection between scans.
    pub fn state(&self) -> Arc<Mutex<TradingState>> {
        Arc::clone(&self.state)
    }

    fn fetch(&self, symbol: &str, now: DateTime<Utc>) -> Result<Prepared, MarketDataError> {
        let timeframe = self.pipeline.timeframe();
        let limit = self.config.scheduling.history_bars;
        let bars = self.data.bars(symbol, timeframe, now, limit)?;
        let higher = match timeframe.higher() {
            Some(h) if self.config.scheduling.use_higher_timeframe => {
                match self.data.bars(symbol, h, now, limit) {
                    Ok(bars) => Some(bars),
                    Err(MarketDataError::NotFound { .. }) => None,
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };
        Ok(self.pipeline.prepare(symbol, bars, higher, now))
    }

    /// Evaluate every configured symbol at `now`.
    ///
    /// A symbol whose data cannot be fetched is reported and skipped. A ledger
    /// failure aborts the scan; decisions already committed in it stand.
    pub fn scan_tick(&self, now: DateTime<Utc>) -> Result<TickReport, RunError> {
        let fetched: Vec<(String, Result<Prepared, MarketDataError>)> = self
            .config
            .symbols
            .par_iter()
            .map(|symbol| (symbol.clone(), self.fetch(symbol, now)))
            .collect();

        let mut fetch_errors = Vec::new();
        let mut frames = Vec::with_capacity(fetched.len());
        let mut signals = Vec::with_capacity(fetched.len());
        for (symbol, result) in fetched {
            match result {
                Ok(Prepared {
                    symbol,
                    bars,
                    higher,
                    signal,
                }) => {
                    frames.push((symbol, bars, higher));
                    signals.push(signal);
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "market data unavailable, symbol skipped");
                    fetch_errors.push((symbol, e.to_string()));
                }
            }
        }

        let mut view = MarketView::new(now);
        for (symbol, bars, higher) in &frames {
            if !bars.is_empty() {
                view.bars.insert(symbol.clone(), bars.as_slice());
            }
            if let Some(higher) = higher {
                view.higher.insert(symbol.clone(), higher.as_slice());
            }
        }

        let mut state = self.state.lock();
        let mut exits = Vec::new();
        for (symbol, bars, _) in &frames {
            if let Some(bar) = bars.last() {
                exits.extend(self.pipeline.process_exits(&mut state, symbol, bar)?);
            }
        }
        let mut decisions = Vec::with_capacity(frames.len());
        for ((symbol, _, _), signal) in frames.iter().zip(signals) {
            let decision = self.pipeline.process(&mut state, &view, symbol, signal)?;
            decisions.push((symbol.clone(), decision));
        }
        self.pipeline.end_of_bar(&mut state, now)?;

        Ok(TickReport {
            now,
            exits,
            decisions,
            fetch_errors,
            equity: state.simulator.equity(),
            open_positions: state.simulator.portfolio().open_count(),
        })
    }

    /// Flatten every open position at its last mark.
    pub fn close_all(&self, now: DateTime<Utc>) -> Result<Vec<Trade>, RunError> {
        let mut state = self.state.lock();
        Ok(self.pipeline.close_session(&mut state, now)?)
    }
}
