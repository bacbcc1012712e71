//! Decision pipeline: one signal through overlays, sizing, guards and the simulator.
//!
//! Every state change follows plan → persist → commit. The simulator plans without
//! mutating, the ledger receives the whole batch, and only then do the simulator and
//! the daily risk state move. A ledger failure leaves both exactly as they were.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use confluence_core::domain::{Bar, CloseReason, DailyRiskState, Position, Timeframe, Trade, TradingSignal};
use confluence_core::engine::{SignalRoute, Simulator, SimulatorError};
use confluence_core::indicators::{IndicatorEngine, IndicatorSeries};
use confluence_core::overlays::{OverlayContext, OverlayPipeline};
use confluence_core::safety::{GuardContext, SafetyChain, SafetyViolation};
use confluence_core::signals::ConfluenceGenerator;
use confluence_core::sizers::{RiskCalculator, Sizer, SizingError};
use confluence_core::{ConfigError, DataError};

use crate::config::PipelineConfig;
use crate::ledger::{Ledger, LedgerError, LedgerRecord};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("persisting {symbol}: {source}")]
    Ledger { symbol: String, source: LedgerError },
    #[error("committing {symbol}: {source}")]
    Commit {
        symbol: String,
        source: SimulatorError,
    },
    #[error("no bars for {0} in the market view")]
    MissingBars(String),
}

/// What happened to one symbol's signal on one bar.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Not enough history for a signal yet.
    NoSignal(DataError),
    Hold,
    /// Routed away by the simulator state machine (already positioned, shorts off).
    Ignored(&'static str),
    Cooldown,
    Vetoed { overlay: String, reason: String },
    Unsized(SizingError),
    Blocked(SafetyViolation),
    Rejected(SimulatorError),
    Opened(Position),
    Closed(Trade),
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoSignal(_) => "no_signal",
            Self::Hold => "hold",
            Self::Ignored(_) => "ignored",
            Self::Cooldown => "cooldown",
            Self::Vetoed { .. } => "vetoed",
            Self::Unsized(_) => "unsized",
            Self::Blocked(_) => "blocked",
            Self::Rejected(_) => "rejected",
            Self::Opened(_) => "opened",
            Self::Closed(_) => "closed",
        }
    }
}

/// Mutable session state. Owned by one writer at a time.
pub struct TradingState {
    pub simulator: Simulator,
    pub daily: DailyRiskState,
    pub ledger: Box<dyn Ledger>,
}

impl TradingState {
    /// Start a session at `now`, resuming the daily risk state from the ledger
    /// when it holds one.
    pub fn new(
        simulator: Simulator,
        ledger: Box<dyn Ledger>,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let daily = match ledger.latest_daily()? {
            Some(daily) => daily,
            None => DailyRiskState::start(now.date_naive(), simulator.equity()),
        };
        Ok(Self {
            simulator,
            daily,
            ledger,
        })
    }

    fn persist(&mut self, symbol: &str, records: &[LedgerRecord]) -> Result<(), PipelineError> {
        self.ledger.append(records).map_err(|source| {
            warn!(symbol, error = %source, "ledger write failed, decision discarded");
            PipelineError::Ledger {
                symbol: symbol.to_string(),
                source,
            }
        })
    }
}

/// Bars visible at `now`, per symbol. Each slice ends at or before `now`.
#[derive(Debug, Clone)]
pub struct MarketView<'a> {
    pub now: DateTime<Utc>,
    pub bars: BTreeMap<String, &'a [Bar]>,
    pub higher: BTreeMap<String, &'a [Bar]>,
}

impl<'a> MarketView<'a> {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            bars: BTreeMap::new(),
            higher: BTreeMap::new(),
        }
    }
}

/// The lock-free half of a decision: data in hand and a raw signal.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub higher: Option<Vec<Bar>>,
    pub signal: Result<TradingSignal, DataError>,
}

pub struct DecisionPipeline {
    timeframe: Timeframe,
    cooldown: Duration,
    engine: IndicatorEngine,
    generator: ConfluenceGenerator,
    overlays: OverlayPipeline,
    sizer: RiskCalculator,
    safety: SafetyChain,
}

impl DecisionPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            timeframe: config.timeframe,
            cooldown: Duration::minutes(config.scheduling.cooldown_minutes),
            engine: IndicatorEngine::standard(),
            generator: ConfluenceGenerator::new(config.confluence.clone())?,
            overlays: OverlayPipeline::new(config.overlays.clone())?,
            sizer: RiskCalculator::new(config.risk_config())?,
            safety: SafetyChain::new(&config.safety)?,
        })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    pub fn safety(&self) -> &SafetyChain {
        &self.safety
    }

    // ─── Signal generation (no shared state) ────────────────────────

    pub fn compute(&self, bars: &[Bar]) -> IndicatorSeries {
        self.engine.compute(bars)
    }

    /// Raw confluence signal for bar `index` of a precomputed series, stamped with
    /// `generated_at`. Signal age, and the entry time of any position it opens, run
    /// from that stamp rather than from the bar's open.
    pub fn raw_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        series: &IndicatorSeries,
        index: usize,
        generated_at: DateTime<Utc>,
    ) -> Result<TradingSignal, DataError> {
        let mut signal = self
            .generator
            .generate(symbol, self.timeframe, bars, series, index)?;
        signal.timestamp = generated_at;
        Ok(signal)
    }

    /// Indicators and the raw signal for the last bar of `bars`, generated at `now`.
    pub fn prepare(
        &self,
        symbol: &str,
        bars: Vec<Bar>,
        higher: Option<Vec<Bar>>,
        now: DateTime<Utc>,
    ) -> Prepared {
        let series = self.engine.compute(&bars);
        let signal = match bars.len().checked_sub(1) {
            Some(last) => self.raw_signal(symbol, &bars, &series, last, now),
            None => Err(DataError::InsufficientHistory {
                required: self.engine.warmup_bars() + 2,
                available: 0,
            }),
        };
        Prepared {
            symbol: symbol.to_string(),
            bars,
            higher,
            signal,
        }
    }

    // ─── Stateful phase ─────────────────────────────────────────────

    /// Close the position on `symbol` if `bar` hits its stop, target or time limit.
    pub fn process_exits(
        &self,
        state: &mut TradingState,
        symbol: &str,
        bar: &Bar,
    ) -> Result<Option<Trade>, PipelineError> {
        let Some(trade) = state.simulator.plan_exit(symbol, bar) else {
            state.simulator.mark(symbol, bar.close);
            return Ok(None);
        };
        state.persist(symbol, &[LedgerRecord::Trade(trade.clone())])?;
        commit_close(state, trade.clone())?;
        state.simulator.mark(symbol, bar.close);
        Ok(Some(trade))
    }

    /// Run one raw signal through the decision chain.
    pub fn process(
        &self,
        state: &mut TradingState,
        view: &MarketView<'_>,
        symbol: &str,
        signal: Result<TradingSignal, DataError>,
    ) -> Result<Decision, PipelineError> {
        let mut signal = match signal {
            Ok(signal) => signal,
            Err(e) => {
                debug!(symbol, reason = %e, "no signal");
                return Ok(Decision::NoSignal(e));
            }
        };
        let now = view.now;

        let side = match state.simulator.route(&signal) {
            SignalRoute::Ignore("hold") => return Ok(Decision::Hold),
            SignalRoute::Ignore(reason) => {
                debug!(symbol, action = %signal.action, reason, "signal ignored");
                return Ok(Decision::Ignored(reason));
            }
            SignalRoute::CloseOpposite => return self.close_opposite(state, signal, now),
            SignalRoute::Open(side) => side,
        };

        if state
            .simulator
            .portfolio()
            .in_cooldown(symbol, now, self.cooldown)
        {
            debug!(symbol, "signal inside cooldown window");
            return Ok(Decision::Cooldown);
        }

        let bars = *view
            .bars
            .get(symbol)
            .ok_or_else(|| PipelineError::MissingBars(symbol.to_string()))?;
        let correlation = self.overlays.correlation();
        if correlation.needs_refresh(state.simulator.portfolio(), now) {
            correlation.refresh(state.simulator.portfolio_mut(), &view.bars, now);
        }

        let equity = state.simulator.equity();
        let ctx = OverlayContext {
            bars,
            higher_bars: view.higher.get(symbol).copied(),
            portfolio: state.simulator.portfolio(),
            equity,
            risk_fraction: self.sizer.risk_fraction(),
            now,
        };
        if let Err(e) = self.overlays.apply(&mut signal, &ctx) {
            debug!(symbol, reason = %e, "overlay lacked history");
            return Ok(Decision::NoSignal(e));
        }
        if let Some((overlay, reason)) = signal.quant_adjustments.rejected_by.clone() {
            return Ok(Decision::Vetoed { overlay, reason });
        }

        let balance = state.simulator.cash();
        let plan = match self.sizer.size(&mut signal, balance) {
            Ok(plan) => plan,
            Err(e) => {
                debug!(symbol, reason = %e, "signal not sized");
                return Ok(Decision::Unsized(e));
            }
        };

        let daily = self.safety.daily_loss().observe(&state.daily, now, equity);
        let guard = GuardContext {
            now,
            balance,
            position_value: plan.notional(),
            risk_amount: plan.risk_amount(),
            daily: &daily,
        };
        if let Err(violation) = self.safety.check(&guard) {
            self.settle_daily(state, symbol, daily)?;
            return Ok(Decision::Blocked(violation));
        }

        let position = match state.simulator.plan_open(&signal, &plan) {
            Ok(position) => position,
            Err(e) => {
                debug!(symbol, ?side, reason = %e, "simulator rejected entry");
                self.settle_daily(state, symbol, daily)?;
                return Ok(Decision::Rejected(e));
            }
        };

        state.persist(
            symbol,
            &[
                LedgerRecord::Signal(signal),
                LedgerRecord::PositionOpened(position.clone()),
                LedgerRecord::Daily(daily.clone()),
            ],
        )?;
        state
            .simulator
            .commit_open(position.clone())
            .map_err(|source| PipelineError::Commit {
                symbol: symbol.to_string(),
                source,
            })?;
        state.daily = daily;
        state.simulator.portfolio_mut().record_signal(symbol, now);
        Ok(Decision::Opened(position))
    }

    /// Opposite signals close at the signal price without overlays, sizing or guards.
    fn close_opposite(
        &self,
        state: &mut TradingState,
        signal: TradingSignal,
        now: DateTime<Utc>,
    ) -> Result<Decision, PipelineError> {
        let symbol = signal.symbol.clone();
        let trade = match state.simulator.plan_close(
            &symbol,
            signal.entry_price,
            now,
            CloseReason::OppositeSignal,
        ) {
            Ok(trade) => trade,
            Err(e) => return Ok(Decision::Rejected(e)),
        };
        state.persist(
            &symbol,
            &[LedgerRecord::Signal(signal), LedgerRecord::Trade(trade.clone())],
        )?;
        commit_close(state, trade.clone())?;
        Ok(Decision::Closed(trade))
    }

    /// Mark-to-market bookkeeping once every symbol has been processed for `now`.
    pub fn end_of_bar(
        &self,
        state: &mut TradingState,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        state.simulator.record_equity(now);
        let equity = state.simulator.equity();
        let daily = self.safety.daily_loss().observe(&state.daily, now, equity);
        self.settle_daily(state, "*", daily)
    }

    /// Close every open position at its last mark.
    pub fn close_session(
        &self,
        state: &mut TradingState,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trade>, PipelineError> {
        let trades = state
            .simulator
            .plan_close_all(now, CloseReason::SessionClose);
        if trades.is_empty() {
            return Ok(trades);
        }
        let records: Vec<LedgerRecord> = trades.iter().cloned().map(LedgerRecord::Trade).collect();
        state.persist("*", &records)?;
        for trade in &trades {
            commit_close(state, trade.clone())?;
        }
        info!(closed = trades.len(), "session closed");
        Ok(trades)
    }

    /// Commit a new daily state, persisting it first when the day rolled over or the
    /// halt latched.
    fn settle_daily(
        &self,
        state: &mut TradingState,
        symbol: &str,
        next: DailyRiskState,
    ) -> Result<(), PipelineError> {
        let changed =
            next.date != state.daily.date || next.limit_triggered != state.daily.limit_triggered;
        if changed {
            state.persist(symbol, &[LedgerRecord::Daily(next.clone())])?;
        }
        state.daily = next;
        Ok(())
    }
}

fn commit_close(state: &mut TradingState, trade: Trade) -> Result<(), PipelineError> {
    let symbol = trade.symbol.clone();
    state
        .simulator
        .commit_close(trade)
        .map_err(|source| PipelineError::Commit { symbol, source })
}
