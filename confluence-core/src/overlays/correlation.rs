//! Correlation overlay and portfolio heat cap.
//!
//! Pairwise Pearson correlations of timestamp-aligned returns over a trailing
//! window are cached in `PortfolioState` and refreshed on a fixed cadence. A new
//! position is vetoed when the projected heat would exceed `max_heat`; a candidate
//! highly correlated with an existing position is sized down.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Overlay, OverlayContext};
use crate::domain::{Bar, TradingSignal};
use crate::error::{require_positive, require_unit, ConfigError, DataError};
use crate::portfolio::PortfolioState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub lookback_days: i64,
    pub refresh_minutes: i64,
    /// Minimum overlapping returns before a correlation is trusted.
    pub min_observations: usize,
    pub default_correlation: f64,
    pub max_heat: f64,
    pub high_correlation: f64,
    pub correlated_size_multiplier: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            refresh_minutes: 60,
            min_observations: 10,
            default_correlation: 0.5,
            max_heat: 0.06,
            high_correlation: 0.7,
            correlated_size_multiplier: 0.75,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback_days <= 0 {
            return Err(ConfigError::invalid("correlation.lookback_days", "must be > 0"));
        }
        if self.refresh_minutes <= 0 {
            return Err(ConfigError::invalid("correlation.refresh_minutes", "must be > 0"));
        }
        if self.min_observations < 2 {
            return Err(ConfigError::invalid("correlation.min_observations", "must be >= 2"));
        }
        if !(-1.0..=1.0).contains(&self.default_correlation) {
            return Err(ConfigError::invalid(
                "correlation.default_correlation",
                "must be in [-1, 1]",
            ));
        }
        require_positive("correlation.max_heat", self.max_heat)?;
        require_unit("correlation.high_correlation", self.high_correlation)?;
        require_positive(
            "correlation.correlated_size_multiplier",
            self.correlated_size_multiplier,
        )
    }
}

/// Pearson correlation. None for fewer than two points or a zero-variance side.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Returns of the closes both series share a timestamp for, from `since` onward.
pub fn aligned_returns(a: &[Bar], b: &[Bar], since: DateTime<Utc>) -> (Vec<f64>, Vec<f64>) {
    let b_closes: HashMap<DateTime<Utc>, f64> = b
        .iter()
        .filter(|bar| bar.timestamp >= since)
        .map(|bar| (bar.timestamp, bar.close))
        .collect();
    let paired: Vec<(f64, f64)> = a
        .iter()
        .filter(|bar| bar.timestamp >= since)
        .filter_map(|bar| b_closes.get(&bar.timestamp).map(|&bc| (bar.close, bc)))
        .collect();
    paired
        .windows(2)
        .filter(|w| w[0].0 > 0.0 && w[0].1 > 0.0)
        .map(|w| (w[1].0 / w[0].0 - 1.0, w[1].1 / w[0].1 - 1.0))
        .unzip()
}

#[derive(Debug, Clone)]
pub struct CorrelationOverlay {
    config: CorrelationConfig,
}

impl CorrelationOverlay {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Correlation of two bar series over the trailing window ending at `now`.
    pub fn correlation(&self, a: &[Bar], b: &[Bar], now: DateTime<Utc>) -> f64 {
        let since = now - Duration::days(self.config.lookback_days);
        let (ra, rb) = aligned_returns(a, b, since);
        if ra.len() < self.config.min_observations {
            return self.config.default_correlation;
        }
        pearson(&ra, &rb).unwrap_or(self.config.default_correlation)
    }

    /// True when the cached matrix is older than the refresh cadence.
    pub fn needs_refresh(&self, portfolio: &PortfolioState, now: DateTime<Utc>) -> bool {
        let max_age = Duration::minutes(self.config.refresh_minutes);
        portfolio.correlations().is_stale(now, max_age)
    }

    /// Recompute the cached matrix if it is older than the refresh cadence.
    ///
    /// Returns true when the cache was rebuilt.
    pub fn refresh(
        &self,
        portfolio: &mut PortfolioState,
        histories: &BTreeMap<String, &[Bar]>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.needs_refresh(portfolio, now) {
            return false;
        }
        let entries: Vec<(&String, &[Bar])> = histories.iter().map(|(s, b)| (s, *b)).collect();
        let cache = portfolio.correlations_mut();
        cache.clear();
        for (i, (a, bars_a)) in entries.iter().enumerate() {
            for (b, bars_b) in &entries[i + 1..] {
                let corr = self.correlation(bars_a, bars_b, now);
                cache.insert(a, b, corr);
            }
        }
        cache.mark_computed(now);
        debug!(pairs = cache.len(), "correlation matrix refreshed");
        true
    }

    fn cached(&self, portfolio: &PortfolioState, a: &str, b: &str) -> f64 {
        portfolio
            .correlations()
            .get(a, b)
            .unwrap_or(self.config.default_correlation)
    }
}

impl Overlay for CorrelationOverlay {
    fn name(&self) -> &str {
        "correlation"
    }

    fn apply(&self, signal: &mut TradingSignal, ctx: &OverlayContext) -> Result<(), DataError> {
        let heat = ctx.portfolio.projected_heat(
            &signal.symbol,
            ctx.risk_fraction,
            ctx.equity,
            self.config.default_correlation,
        );
        if heat > self.config.max_heat {
            signal.reject(
                self.name(),
                format!(
                    "projected heat {heat:.4} exceeds cap {:.4}",
                    self.config.max_heat
                ),
            );
            return Ok(());
        }

        let peak = ctx
            .portfolio
            .positions()
            .filter(|p| p.symbol != signal.symbol)
            .map(|p| (p.symbol.as_str(), self.cached(ctx.portfolio, &signal.symbol, &p.symbol)))
            .fold(None, |best: Option<(&str, f64)>, (s, c)| match best {
                Some((_, bc)) if bc >= c => best,
                _ => Some((s, c)),
            });

        let confidence = signal.confidence;
        match peak {
            Some((other, corr)) if corr > self.config.high_correlation => {
                signal.apply_adjustment(
                    self.name(),
                    confidence,
                    self.config.correlated_size_multiplier,
                    format!("heat={heat:.4} corr with {other}={corr:.2}"),
                );
            }
            _ => {
                signal.apply_adjustment(self.name(), confidence, 1.0, format!("heat={heat:.4}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Position, PositionSide, SignalAction, Timeframe};
    use crate::indicators::make_bars;
    use crate::testing::{sample_signal, sample_snapshot, t0};

    fn ctx<'a>(bars: &'a [Bar], portfolio: &'a PortfolioState, risk: f64) -> OverlayContext<'a> {
        OverlayContext {
            bars,
            higher_bars: None,
            portfolio,
            equity: 1_000.0,
            risk_fraction: risk,
            now: t0(),
        }
    }

    fn open(p: &mut PortfolioState, symbol: &str, risk_amount: f64) {
        // entry 100, stop 90, size chosen so |entry − stop| × size = risk_amount
        let pos = Position::open(
            symbol,
            Timeframe::H1,
            PositionSide::Long,
            100.0,
            t0(),
            risk_amount / 10.0,
            90.0,
            120.0,
        );
        p.insert_position(pos).unwrap();
    }

    #[test]
    fn pearson_perfect_and_inverse() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson(&a, &[1.0; 4]).is_none());
    }

    #[test]
    fn short_overlap_uses_default() {
        let overlay = CorrelationOverlay::new(CorrelationConfig::default());
        let a = make_bars(&[100.0, 101.0, 102.0]);
        let b = make_bars(&[50.0, 51.0, 50.5]);
        let now = a[2].timestamp;
        assert_eq!(overlay.correlation(&a, &b, now), 0.5);
    }

    #[test]
    fn refresh_respects_cadence() {
        let overlay = CorrelationOverlay::new(CorrelationConfig::default());
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.5).sin()).collect();
        let scaled: Vec<f64> = closes.iter().map(|c| c * 2.0).collect();
        let mut histories = BTreeMap::new();
        let (btc, eth) = (make_bars(&closes), make_bars(&scaled));
        histories.insert("BTC".to_string(), btc.as_slice());
        histories.insert("ETH".to_string(), eth.as_slice());
        let now = btc[39].timestamp;

        let mut p = PortfolioState::default();
        assert!(overlay.refresh(&mut p, &histories, now));
        assert!((p.correlations().get("ETH", "BTC").unwrap() - 1.0).abs() < 1e-9);
        assert!(!overlay.refresh(&mut p, &histories, now + Duration::minutes(30)));
        assert!(overlay.refresh(&mut p, &histories, now + Duration::minutes(60)));
    }

    #[test]
    fn heat_cap_rejects_without_flipping() {
        let overlay = CorrelationOverlay::new(CorrelationConfig::default());
        let mut p = PortfolioState::default();
        // existing risk 0.3 of equity; candidate 0.3 at corr 0.9 → heat 0.081
        open(&mut p, "ETH", 300.0);
        p.correlations_mut().insert("BTCUSDT", "ETH", 0.9);
        let bars = make_bars(&[100.0; 3]);
        let mut s = sample_signal(SignalAction::Buy, 0.8, sample_snapshot());
        overlay.apply(&mut s, &ctx(&bars, &p, 0.3)).unwrap();
        assert!(s.is_rejected());
        assert_eq!(s.action, SignalAction::Buy);
    }

    #[test]
    fn high_correlation_scales_size() {
        let overlay = CorrelationOverlay::new(CorrelationConfig::default());
        let mut p = PortfolioState::default();
        open(&mut p, "ETH", 10.0);
        p.correlations_mut().insert("BTCUSDT", "ETH", 0.85);
        let bars = make_bars(&[100.0; 3]);
        let mut s = sample_signal(SignalAction::Buy, 0.8, sample_snapshot());
        overlay.apply(&mut s, &ctx(&bars, &p, 0.01)).unwrap();
        assert!(!s.is_rejected());
        assert_eq!(s.quant_adjustments.size_multiplier, 0.75);
        assert_eq!(s.confidence, 0.8);
    }

    #[test]
    fn empty_portfolio_passes_unchanged() {
        let overlay = CorrelationOverlay::new(CorrelationConfig::default());
        let p = PortfolioState::default();
        let bars = make_bars(&[100.0; 3]);
        let mut s = sample_signal(SignalAction::Sell, 0.8, sample_snapshot());
        overlay.apply(&mut s, &ctx(&bars, &p, 0.01)).unwrap();
        assert_eq!(s.quant_adjustments.size_multiplier, 1.0);
    }
}
