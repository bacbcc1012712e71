//! Simulator: owns cash, open positions, closed trades and the equity curve.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::exits::{exit_trigger, ExitPriority, ExitRules};
use crate::domain::{Bar, CloseReason, Position, PositionSide, SignalAction, Trade, TradingSignal};
use crate::error::{require_positive, require_unit, ConfigError};
use crate::portfolio::PortfolioState;
use crate::sizers::PositionPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub initial_capital: f64,
    pub max_positions: usize,
    pub allow_short: bool,
    /// Close positions held this long at the bar close. None disables the limit.
    pub max_hold_minutes: Option<i64>,
    pub exit_priority: ExitPriority,
    /// Heat cap re-checked at acceptance with realized position risks. Not read
    /// from configuration files: callers that also run the correlation overlay copy
    /// its limits here so both checks share one cap.
    #[serde(skip)]
    pub max_heat: f64,
    #[serde(skip)]
    pub default_correlation: f64,
    pub expectancy_window: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            max_positions: 5,
            allow_short: false,
            max_hold_minutes: None,
            exit_priority: ExitPriority::StopLossFirst,
            max_heat: 0.06,
            default_correlation: 0.5,
            expectancy_window: 50,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("simulator.initial_capital", self.initial_capital)?;
        if self.max_positions == 0 {
            return Err(ConfigError::invalid("simulator.max_positions", "must be >= 1"));
        }
        if self.max_hold_minutes.is_some_and(|m| m <= 0) {
            return Err(ConfigError::invalid("simulator.max_hold_minutes", "must be > 0"));
        }
        require_positive("simulator.max_heat", self.max_heat)?;
        require_unit("simulator.default_correlation", self.default_correlation)?;
        Ok(())
    }

    pub fn exit_rules(&self) -> ExitRules {
        ExitRules {
            priority: self.exit_priority,
            max_hold: self.max_hold_minutes.map(Duration::minutes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulatorError {
    #[error("HOLD signals never open positions")]
    HoldSignal,
    #[error("position already open for {0}")]
    DuplicatePosition(String),
    #[error("max open positions reached ({0})")]
    MaxPositions(usize),
    #[error("short selling is disabled")]
    ShortDisabled,
    #[error("insufficient cash: need {need:.2}, have {available:.2}")]
    InsufficientCash { need: f64, available: f64 },
    #[error("portfolio heat {heat:.4} would exceed cap {max:.4}")]
    HeatExceeded { heat: f64, max: f64 },
    #[error("no open position for {0}")]
    NoPosition(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// What an incoming signal means for the symbol's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRoute {
    /// Flat symbol: try to open on this side.
    Open(PositionSide),
    /// Signal opposes the open position: close it.
    CloseOpposite,
    Ignore(&'static str),
}

/// One point on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub peak: f64,
    /// (equity − peak) / peak, as a percentage (≤ 0).
    pub drawdown_pct: f64,
}

#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulatorConfig,
    cash: f64,
    portfolio: PortfolioState,
    marks: BTreeMap<String, f64>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    peak_equity: f64,
    max_drawdown_pct: f64,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            cash: config.initial_capital,
            portfolio: PortfolioState::new(config.expectancy_window),
            marks: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            peak_equity: config.initial_capital,
            max_drawdown_pct: 0.0,
            config,
        })
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Cash not tied up in open positions.
    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    pub fn portfolio_mut(&mut self) -> &mut PortfolioState {
        &mut self.portfolio
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    /// Cash plus every open position's entry notional and unrealized PnL.
    pub fn equity(&self) -> f64 {
        self.cash
            + self
                .portfolio
                .positions()
                .map(|p| p.notional() + p.unrealized_pnl)
                .sum::<f64>()
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    // ─── Routing ────────────────────────────────────────────────────

    pub fn route(&self, signal: &TradingSignal) -> SignalRoute {
        let Some(side) = signal.action.entry_side() else {
            return SignalRoute::Ignore("hold");
        };
        match self.portfolio.position(&signal.symbol) {
            Some(p) if p.side == side => SignalRoute::Ignore("already positioned"),
            Some(_) => SignalRoute::CloseOpposite,
            None if side == PositionSide::Short && !self.config.allow_short => {
                SignalRoute::Ignore("short selling disabled")
            }
            None => SignalRoute::Open(side),
        }
    }

    // ─── Opening ────────────────────────────────────────────────────

    /// Validate `plan` for `signal` and build the position it would open.
    ///
    /// Checks uniqueness, the position cap, cash and portfolio heat against the
    /// current state. Nothing is mutated.
    pub fn plan_open(
        &self,
        signal: &TradingSignal,
        plan: &PositionPlan,
    ) -> Result<Position, SimulatorError> {
        if signal.action == SignalAction::Hold {
            return Err(SimulatorError::HoldSignal);
        }
        if plan.side == PositionSide::Short && !self.config.allow_short {
            return Err(SimulatorError::ShortDisabled);
        }
        if !(plan.size > 0.0 && plan.entry_price > 0.0) {
            return Err(SimulatorError::InvalidPlan(format!(
                "size {} at entry {}",
                plan.size, plan.entry_price
            )));
        }
        if self.portfolio.has_position(&signal.symbol) {
            return Err(SimulatorError::DuplicatePosition(signal.symbol.clone()));
        }
        if self.portfolio.open_count() >= self.config.max_positions {
            return Err(SimulatorError::MaxPositions(self.config.max_positions));
        }
        let need = plan.notional();
        if need > self.cash + 1e-9 {
            return Err(SimulatorError::InsufficientCash {
                need,
                available: self.cash,
            });
        }

        let equity = self.equity();
        let heat = self.portfolio.projected_heat(
            &signal.symbol,
            plan.risk_amount() / equity,
            equity,
            self.config.default_correlation,
        );
        if heat > self.config.max_heat {
            return Err(SimulatorError::HeatExceeded {
                heat,
                max: self.config.max_heat,
            });
        }

        Ok(Position::open(
            signal.symbol.as_str(),
            signal.timeframe,
            plan.side,
            plan.entry_price,
            signal.timestamp,
            plan.size,
            plan.stop_loss,
            plan.take_profit,
        ))
    }

    /// Apply a planned open: deduct the notional and record the position.
    pub fn commit_open(&mut self, position: Position) -> Result<(), SimulatorError> {
        let notional = position.notional();
        let symbol = position.symbol.clone();
        let entry = position.entry_price;
        self.portfolio
            .insert_position(position)
            .map_err(|p| SimulatorError::DuplicatePosition(p.symbol))?;
        self.cash -= notional;
        self.marks.insert(symbol.clone(), entry);
        info!(%symbol, entry, notional, cash = self.cash, "position opened");
        Ok(())
    }

    pub fn open(
        &mut self,
        signal: &TradingSignal,
        plan: &PositionPlan,
    ) -> Result<Position, SimulatorError> {
        let position = self.plan_open(signal, plan)?;
        self.commit_open(position.clone())?;
        Ok(position)
    }

    // ─── Closing ────────────────────────────────────────────────────

    /// The trade closing `symbol` at `price` would produce.
    pub fn plan_close(
        &self,
        symbol: &str,
        price: f64,
        at: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<Trade, SimulatorError> {
        let position = self
            .portfolio
            .position(symbol)
            .ok_or_else(|| SimulatorError::NoPosition(symbol.to_string()))?;
        if !(price > 0.0) {
            return Err(SimulatorError::InvalidPlan(format!("exit price {price}")));
        }
        let realized_pnl = position.pnl_at(price);
        let notional = position.notional();
        Ok(Trade {
            symbol: position.symbol.clone(),
            timeframe: position.timeframe,
            side: position.side,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            exit_price: price,
            exit_time: at,
            size: position.size,
            realized_pnl,
            pnl_pct: if notional > 0.0 {
                realized_pnl / notional * 100.0
            } else {
                0.0
            },
            initial_risk: position.risk_amount(),
            hold_time: at - position.entry_time,
            close_reason: reason,
        })
    }

    /// Apply a planned close: credit notional plus PnL, append the trade and feed the
    /// expectancy history.
    pub fn commit_close(&mut self, trade: Trade) -> Result<(), SimulatorError> {
        let position = self
            .portfolio
            .remove_position(&trade.symbol)
            .ok_or_else(|| SimulatorError::NoPosition(trade.symbol.clone()))?;
        self.cash += position.notional() + trade.realized_pnl;
        self.marks.insert(trade.symbol.clone(), trade.exit_price);
        self.portfolio.record_trade(&trade);
        info!(
            symbol = %trade.symbol,
            reason = %trade.close_reason,
            pnl = trade.realized_pnl,
            cash = self.cash,
            "position closed"
        );
        self.trades.push(trade);
        Ok(())
    }

    pub fn close(
        &mut self,
        symbol: &str,
        price: f64,
        at: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<Trade, SimulatorError> {
        let trade = self.plan_close(symbol, price, at, reason)?;
        self.commit_close(trade.clone())?;
        Ok(trade)
    }

    // ─── Per-bar maintenance ────────────────────────────────────────

    /// The exit `bar` triggers for the open position on `symbol`, if any.
    pub fn plan_exit(&self, symbol: &str, bar: &Bar) -> Option<Trade> {
        let position = self.portfolio.position(symbol)?;
        let fill = exit_trigger(position, bar, &self.config.exit_rules())?;
        self.plan_close(symbol, fill.price, bar.timestamp, fill.reason)
            .ok()
    }

    /// Mark the open position on `symbol` at `price`.
    pub fn mark(&mut self, symbol: &str, price: f64) {
        if !price.is_finite() {
            return;
        }
        self.marks.insert(symbol.to_string(), price);
        if let Some(p) = self.portfolio.position_mut(symbol) {
            p.mark(price);
        }
    }

    /// Trades that closing every open position at its last mark would produce.
    pub fn plan_close_all(&self, at: DateTime<Utc>, reason: CloseReason) -> Vec<Trade> {
        self.portfolio
            .positions()
            .filter_map(|p| {
                let price = self.last_price(&p.symbol).unwrap_or(p.entry_price);
                self.plan_close(&p.symbol, price, at, reason).ok()
            })
            .collect()
    }

    /// Close everything at the last marks (SESSION_CLOSE).
    pub fn close_session(&mut self, at: DateTime<Utc>) -> Vec<Trade> {
        self.plan_close_all(at, CloseReason::SessionClose)
            .into_iter()
            .filter(|trade| self.commit_close(trade.clone()).is_ok())
            .collect()
    }

    /// Append an equity point and update the running peak and drawdown.
    pub fn record_equity(&mut self, at: DateTime<Utc>) -> EquityPoint {
        let equity = self.equity();
        self.peak_equity = self.peak_equity.max(equity);
        let drawdown_pct = if self.peak_equity > 0.0 {
            (equity - self.peak_equity) / self.peak_equity * 100.0
        } else {
            0.0
        };
        self.max_drawdown_pct = self.max_drawdown_pct.min(drawdown_pct);
        let point = EquityPoint {
            timestamp: at,
            equity,
            peak: self.peak_equity,
            drawdown_pct,
        };
        self.equity_curve.push(point);
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;
    use crate::testing::{sample_signal, sample_snapshot, t0};

    fn sim() -> Simulator {
        Simulator::new(SimulatorConfig::default()).unwrap()
    }

    fn buy(symbol: &str) -> TradingSignal {
        let mut s = sample_signal(SignalAction::Buy, 0.8, sample_snapshot());
        s.symbol = symbol.to_string();
        s
    }

    fn plan(side: PositionSide, size: f64) -> PositionPlan {
        let dir = side.sign();
        PositionPlan {
            side,
            entry_price: 100.0,
            stop_loss: 100.0 - dir * 4.0,
            take_profit: 100.0 + dir * 8.0,
            size,
        }
    }

    #[test]
    fn open_deducts_notional() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 2.0)).unwrap();
        assert_eq!(s.cash(), 9_800.0);
        assert_eq!(s.equity(), 10_000.0);
        assert!(s.portfolio().has_position("BTC"));
    }

    #[test]
    fn round_trip_at_same_price_is_flat() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 2.0)).unwrap();
        let trade = s
            .close("BTC", 100.0, t0() + Duration::hours(1), CloseReason::Manual)
            .unwrap();
        assert_eq!(trade.realized_pnl, 0.0);
        assert_eq!(s.cash(), 10_000.0);
        assert_eq!(trade.hold_time, Duration::hours(1));
    }

    #[test]
    fn long_and_short_pnl() {
        let mut s = Simulator::new(SimulatorConfig {
            allow_short: true,
            ..SimulatorConfig::default()
        })
        .unwrap();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 2.0)).unwrap();
        let mut sell = buy("ETH");
        sell.action = SignalAction::Sell;
        s.open(&sell, &plan(PositionSide::Short, 1.0)).unwrap();

        let long = s.close("BTC", 105.0, t0(), CloseReason::TakeProfit).unwrap();
        let short = s.close("ETH", 105.0, t0(), CloseReason::StopLoss).unwrap();
        assert_eq!(long.realized_pnl, 10.0);
        assert_eq!(short.realized_pnl, -5.0);
        assert_eq!(long.r_multiple(), Some(1.25));
        assert_eq!(s.cash(), 10_005.0);
        assert_eq!(s.trades().len(), 2);
    }

    #[test]
    fn one_position_per_symbol_and_cap() {
        let mut s = Simulator::new(SimulatorConfig {
            max_positions: 1,
            max_heat: 1.0,
            ..SimulatorConfig::default()
        })
        .unwrap();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 1.0)).unwrap();
        assert_eq!(
            s.plan_open(&buy("BTC"), &plan(PositionSide::Long, 1.0)),
            Err(SimulatorError::DuplicatePosition("BTC".into()))
        );
        assert_eq!(
            s.plan_open(&buy("ETH"), &plan(PositionSide::Long, 1.0)),
            Err(SimulatorError::MaxPositions(1))
        );
    }

    #[test]
    fn hold_and_disabled_shorts_never_open() {
        let s = sim();
        let mut hold = buy("BTC");
        hold.action = SignalAction::Hold;
        assert_eq!(s.route(&hold), SignalRoute::Ignore("hold"));
        assert_eq!(
            s.plan_open(&hold, &plan(PositionSide::Long, 1.0)),
            Err(SimulatorError::HoldSignal)
        );
        let mut sell = buy("BTC");
        sell.action = SignalAction::Sell;
        assert_eq!(s.route(&sell), SignalRoute::Ignore("short selling disabled"));
        assert_eq!(
            s.plan_open(&sell, &plan(PositionSide::Short, 1.0)),
            Err(SimulatorError::ShortDisabled)
        );
    }

    #[test]
    fn opposite_signal_routes_to_close() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 1.0)).unwrap();
        let mut sell = buy("BTC");
        sell.action = SignalAction::Sell;
        assert_eq!(s.route(&sell), SignalRoute::CloseOpposite);
        assert_eq!(s.route(&buy("BTC")), SignalRoute::Ignore("already positioned"));
    }

    #[test]
    fn insufficient_cash_is_rejected() {
        let s = sim();
        assert!(matches!(
            s.plan_open(&buy("BTC"), &plan(PositionSide::Long, 101.0)),
            Err(SimulatorError::InsufficientCash { .. })
        ));
    }

    #[test]
    fn heat_cap_blocks_correlated_stack() {
        let mut s = sim();
        // each position risks 4 × 20 = 80 of 10,000 equity: 0.8%
        s.open(&buy("BTC"), &plan(PositionSide::Long, 20.0)).unwrap();
        s.portfolio_mut().correlations_mut().insert("BTC", "ETH", 1.0);
        let mut tight = s.clone();
        tight.config.max_heat = 0.00005;
        assert!(matches!(
            tight.plan_open(&buy("ETH"), &plan(PositionSide::Long, 20.0)),
            Err(SimulatorError::HeatExceeded { .. })
        ));
        assert!(s.plan_open(&buy("ETH"), &plan(PositionSide::Long, 20.0)).is_ok());
    }

    #[test]
    fn planning_does_not_mutate() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 1.0)).unwrap();
        let before = s.cash();
        let _ = s.plan_close("BTC", 120.0, t0(), CloseReason::Manual).unwrap();
        let _ = s.plan_open(&buy("ETH"), &plan(PositionSide::Long, 1.0)).unwrap();
        assert_eq!(s.cash(), before);
        assert_eq!(s.portfolio().open_count(), 1);
        assert!(s.trades().is_empty());
    }

    #[test]
    fn exits_and_session_close() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 1.0)).unwrap();
        s.open(&buy("ETH"), &plan(PositionSide::Long, 1.0)).unwrap();
        let bar = Bar::new(t0() + Duration::hours(1), 99.0, 100.0, 95.0, 97.0, 1.0);
        let trade = s.plan_exit("BTC", &bar).unwrap();
        assert_eq!(trade.close_reason, CloseReason::StopLoss);
        assert_eq!(trade.exit_price, 96.0);
        s.commit_close(trade).unwrap();

        s.mark("ETH", 103.0);
        let closed = s.close_session(t0() + Duration::hours(2));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, CloseReason::SessionClose);
        assert_eq!(closed[0].realized_pnl, 3.0);
        assert_eq!(s.portfolio().open_count(), 0);
    }

    #[test]
    fn closed_trades_feed_expectancy() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 1.0)).unwrap();
        s.close("BTC", 108.0, t0(), CloseReason::TakeProfit).unwrap();
        assert_eq!(s.portfolio().expectancy().samples("BTC", Timeframe::H1), vec![2.0]);
    }

    #[test]
    fn equity_curve_tracks_peak_and_drawdown() {
        let mut s = sim();
        s.open(&buy("BTC"), &plan(PositionSide::Long, 10.0)).unwrap();
        s.mark("BTC", 110.0);
        assert_eq!(s.record_equity(t0()).equity, 10_100.0);
        s.mark("BTC", 90.0);
        let p = s.record_equity(t0() + Duration::hours(1));
        assert_eq!(p.peak, 10_100.0);
        assert!((p.drawdown_pct - (-200.0 / 10_100.0 * 100.0)).abs() < 1e-9);
        assert_eq!(s.max_drawdown_pct(), p.drawdown_pct);
        assert_eq!(s.equity_curve().len(), 2);
    }

    #[test]
    fn config_validation() {
        assert!(Simulator::new(SimulatorConfig {
            max_positions: 0,
            ..SimulatorConfig::default()
        })
        .is_err());
        assert!(Simulator::new(SimulatorConfig {
            initial_capital: -1.0,
            ..SimulatorConfig::default()
        })
        .is_err());
    }
}
