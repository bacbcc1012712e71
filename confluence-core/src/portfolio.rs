//! PortfolioState: the single owner of open positions and the read-mostly caches
//! the pipeline consults (signal cooldown, correlation matrix, expectancy history).
//!
//! Nothing here is global. Tests and concurrent runners construct isolated instances.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Position, Timeframe, Trade};

/// Pairwise correlations with the time they were computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCache {
    computed_at: Option<DateTime<Utc>>,
    pairs: BTreeMap<String, f64>,
}

fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}|{b}")
    } else {
        format!("{b}|{a}")
    }
}

impl CorrelationCache {
    pub fn computed_at(&self) -> Option<DateTime<Utc>> {
        self.computed_at
    }

    /// True when never computed or at least `max_age` old.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.computed_at {
            Some(at) => now - at >= max_age,
            None => true,
        }
    }

    /// Correlation of a pair. A symbol is perfectly correlated with itself.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        self.pairs.get(&pair_key(a, b)).copied()
    }

    pub fn insert(&mut self, a: &str, b: &str, corr: f64) {
        self.pairs.insert(pair_key(a, b), corr);
    }

    pub fn mark_computed(&mut self, now: DateTime<Utc>) {
        self.computed_at = Some(now);
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.computed_at = None;
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Rolling window of realized R-multiples per (symbol, timeframe).
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectancyHistory {
    window: usize,
    outcomes: HashMap<(String, Timeframe), VecDeque<f64>>,
}

impl ExpectancyHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: HashMap::new(),
        }
    }

    pub fn record(&mut self, symbol: &str, timeframe: Timeframe, r_multiple: f64) {
        if !r_multiple.is_finite() {
            return;
        }
        let entries = self
            .outcomes
            .entry((symbol.to_string(), timeframe))
            .or_default();
        entries.push_back(r_multiple);
        while entries.len() > self.window {
            entries.pop_front();
        }
    }

    pub fn samples(&self, symbol: &str, timeframe: Timeframe) -> Vec<f64> {
        self.outcomes
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for ExpectancyHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

/// Heat = Σ_{i<j} r_i · r_j · corr(i, j).
///
/// `risks` are fractions of equity. A lone position contributes nothing. The sum runs
/// over unordered pairs with a symmetric correlation, so the input order is irrelevant.
pub fn portfolio_heat<F>(risks: &[(String, f64)], corr: F) -> f64
where
    F: Fn(&str, &str) -> f64,
{
    let mut heat = 0.0;
    for (i, (sym_i, r_i)) in risks.iter().enumerate() {
        for (sym_j, r_j) in &risks[i + 1..] {
            heat += r_i * r_j * corr(sym_i, sym_j);
        }
    }
    heat
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    positions: BTreeMap<String, Position>,
    last_signal: HashMap<String, DateTime<Utc>>,
    correlations: CorrelationCache,
    expectancy: ExpectancyHistory,
}

impl PortfolioState {
    pub fn new(expectancy_window: usize) -> Self {
        Self {
            expectancy: ExpectancyHistory::new(expectancy_window),
            ..Self::default()
        }
    }

    // ─── Positions ──────────────────────────────────────────────────

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Insert an open position. Returns the position back if the symbol is taken.
    pub fn insert_position(&mut self, position: Position) -> Result<(), Position> {
        if self.positions.contains_key(&position.symbol) {
            return Err(position);
        }
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    /// Sum of open notionals.
    pub fn exposure(&self) -> f64 {
        self.positions.values().map(Position::notional).sum()
    }

    // ─── Cooldown ───────────────────────────────────────────────────

    pub fn last_signal(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_signal.get(symbol).copied()
    }

    pub fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_signal
            .get(symbol)
            .is_some_and(|at| now - *at < cooldown)
    }

    pub fn record_signal(&mut self, symbol: &str, at: DateTime<Utc>) {
        self.last_signal.insert(symbol.to_string(), at);
    }

    // ─── Caches ─────────────────────────────────────────────────────

    pub fn correlations(&self) -> &CorrelationCache {
        &self.correlations
    }

    pub fn correlations_mut(&mut self) -> &mut CorrelationCache {
        &mut self.correlations
    }

    pub fn expectancy(&self) -> &ExpectancyHistory {
        &self.expectancy
    }

    pub fn expectancy_mut(&mut self) -> &mut ExpectancyHistory {
        &mut self.expectancy
    }

    /// Feed a closed trade's R-multiple into the expectancy window.
    pub fn record_trade(&mut self, trade: &Trade) {
        if let Some(r) = trade.r_multiple() {
            self.expectancy.record(&trade.symbol, trade.timeframe, r);
        }
    }

    // ─── Heat ───────────────────────────────────────────────────────

    /// Capital at risk of every open position, as a fraction of `equity`.
    pub fn position_risks(&self, equity: f64) -> Vec<(String, f64)> {
        if equity <= 0.0 {
            return Vec::new();
        }
        self.positions
            .values()
            .map(|p| (p.symbol.clone(), p.risk_amount() / equity))
            .collect()
    }

    fn correlation_or(&self, default_corr: f64) -> impl Fn(&str, &str) -> f64 + '_ {
        move |a, b| self.correlations.get(a, b).unwrap_or(default_corr)
    }

    /// Heat of the currently open positions.
    pub fn heat(&self, equity: f64, default_corr: f64) -> f64 {
        portfolio_heat(&self.position_risks(equity), self.correlation_or(default_corr))
    }

    /// Heat if a position on `symbol` risking `risk_fraction` of equity were added.
    pub fn projected_heat(
        &self,
        symbol: &str,
        risk_fraction: f64,
        equity: f64,
        default_corr: f64,
    ) -> f64 {
        let mut risks = self.position_risks(equity);
        risks.retain(|(s, _)| s != symbol);
        risks.push((symbol.to_string(), risk_fraction));
        portfolio_heat(&risks, self.correlation_or(default_corr))
    }
}
