//! Performance analyzer: aggregates closed trades into risk/return statistics.
//!
//! Every metric is a pure function of the trade list (ordered by exit time) and the
//! initial capital. Returns are per-trade percentages, annualized with 252 periods.

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use confluence_core::domain::{CloseReason, Trade};

const PERIODS_PER_YEAR: f64 = 252.0;

/// Aggregate statistics for a set of closed trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_pnl: f64,
    /// Percent of initial capital.
    pub total_return: f64,
    /// Percent per year over the calendar span of the trades.
    pub cagr: f64,
    /// Annualized stdev of per-trade returns, in percent.
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    /// Largest peak-to-trough decline of the trade equity path, in percent (≤ 0).
    pub max_drawdown: f64,
    pub avg_drawdown: f64,
    /// Longest run of consecutive trades closing below the running peak.
    pub max_drawdown_duration: usize,

    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent of trades with positive PnL.
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_win: f64,
    /// Mean PnL of losing trades (negative).
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_hold_secs: f64,
    pub longest_win_streak: usize,
    pub longest_loss_streak: usize,

    /// Realized PnL keyed by exit month ("YYYY-MM").
    pub monthly_pnl: BTreeMap<String, f64>,
    /// Realized PnL keyed by exit year.
    pub yearly_pnl: BTreeMap<i32, f64>,
    pub close_reasons: BTreeMap<CloseReason, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalyzer {
    pub initial_capital: f64,
    /// Annual risk-free rate as a fraction (0.02 = 2%).
    pub risk_free_rate: f64,
}

impl PerformanceAnalyzer {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            risk_free_rate: 0.0,
        }
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn analyze(&self, trades: &[Trade]) -> PerformanceReport {
        let mut ordered: Vec<&Trade> = trades.iter().collect();
        ordered.sort_by_key(|t| t.exit_time);

        let pnls: Vec<f64> = ordered.iter().map(|t| t.realized_pnl).collect();
        let returns: Vec<f64> = ordered.iter().map(|t| t.pnl_pct).collect();
        let total_pnl: f64 = pnls.iter().sum();
        let equity = equity_path(self.initial_capital, &pnls);
        let drawdowns = drawdown_series(self.initial_capital, &equity);

        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
        let n = pnls.len();
        let win_rate = ratio(wins.len(), n);
        let loss_rate = ratio(losses.len(), n);
        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);

        let cagr = cagr(self.initial_capital, self.initial_capital + total_pnl, &ordered);
        let max_dd = drawdowns.iter().copied().fold(0.0, f64::min);
        let volatility = annualized_volatility(&returns);

        PerformanceReport {
            initial_capital: self.initial_capital,
            final_capital: self.initial_capital + total_pnl,
            total_pnl,
            total_return: if self.initial_capital > 0.0 {
                total_pnl / self.initial_capital * 100.0
            } else {
                0.0
            },
            cagr,
            volatility,
            sharpe: sharpe_ratio(&returns, self.risk_free_rate),
            sortino: sortino_ratio(&returns, self.risk_free_rate),
            calmar: if max_dd < 0.0 { cagr / max_dd.abs() } else { 0.0 },
            max_drawdown: max_dd,
            avg_drawdown: mean(&drawdowns.iter().copied().filter(|d| *d < 0.0).collect::<Vec<_>>()),
            max_drawdown_duration: longest_run(drawdowns.iter().map(|d| *d < 0.0)),

            trade_count: n,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: win_rate * 100.0,
            profit_factor: profit_factor(&pnls),
            expectancy: win_rate * avg_win + loss_rate * avg_loss,
            avg_win,
            avg_loss,
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            avg_hold_secs: mean(
                &ordered
                    .iter()
                    .map(|t| t.hold_time.num_seconds() as f64)
                    .collect::<Vec<_>>(),
            ),
            longest_win_streak: longest_run(pnls.iter().map(|p| *p > 0.0)),
            longest_loss_streak: longest_run(pnls.iter().map(|p| *p < 0.0)),

            monthly_pnl: bucket(&ordered, |t| {
                format!("{:04}-{:02}", t.exit_time.year(), t.exit_time.month())
            }),
            yearly_pnl: bucket(&ordered, |t| t.exit_time.year()),
            close_reasons: ordered.iter().fold(BTreeMap::new(), |mut acc, t| {
                *acc.entry(t.close_reason).or_insert(0) += 1;
                acc
            }),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Gross profit / |gross loss|. Infinite with wins and no losses; 0 with neither.
pub fn profit_factor(pnls: &[f64]) -> f64 {
    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// stdev(returns %) × √252.
pub fn annualized_volatility(returns: &[f64]) -> f64 {
    std_dev(returns) * PERIODS_PER_YEAR.sqrt()
}

/// (mean × 252 − rf × 100) / volatility. Zero when volatility is zero.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let vol = annualized_volatility(returns);
    if vol < 1e-15 {
        return 0.0;
    }
    (mean(returns) * PERIODS_PER_YEAR - risk_free_rate * 100.0) / vol
}

/// Like Sharpe, but over the downside deviation of negative returns.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_dev =
        (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt()
            * PERIODS_PER_YEAR.sqrt();
    if downside_dev < 1e-15 {
        return 0.0;
    }
    (mean(returns) * PERIODS_PER_YEAR - risk_free_rate * 100.0) / downside_dev
}

/// Compound annual growth in percent from the first entry to the last exit.
fn cagr(initial: f64, final_capital: f64, ordered: &[&Trade]) -> f64 {
    let (Some(first), Some(last)) = (
        ordered.iter().map(|t| t.entry_time).min(),
        ordered.iter().map(|t| t.exit_time).max(),
    ) else {
        return 0.0;
    };
    let years = (last - first).num_seconds() as f64 / (365.25 * 86_400.0);
    if years <= 0.0 || initial <= 0.0 || final_capital <= 0.0 {
        return 0.0;
    }
    ((final_capital / initial).powf(1.0 / years) - 1.0) * 100.0
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Equity after each trade.
fn equity_path(initial: f64, pnls: &[f64]) -> Vec<f64> {
    pnls.iter()
        .scan(initial, |equity, pnl| {
            *equity += pnl;
            Some(*equity)
        })
        .collect()
}

/// Percent below the running peak after each trade (≤ 0).
fn drawdown_series(initial: f64, equity: &[f64]) -> Vec<f64> {
    let mut peak = initial;
    equity
        .iter()
        .map(|&eq| {
            peak = peak.max(eq);
            if peak > 0.0 {
                (eq - peak) / peak * 100.0
            } else {
                0.0
            }
        })
        .collect()
}

fn longest_run(flags: impl Iterator<Item = bool>) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for flag in flags {
        if flag {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn bucket<K: Ord>(ordered: &[&Trade], key: impl Fn(&Trade) -> K) -> BTreeMap<K, f64> {
    let mut out = BTreeMap::new();
    for trade in ordered {
        *out.entry(key(trade)).or_insert(0.0) += trade.realized_pnl;
    }
    out
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
