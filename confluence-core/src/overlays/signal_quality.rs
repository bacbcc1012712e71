//! Signal quality: time decay and expectancy.
//!
//! Confidence decays as `e^{-λ·minutes}` from the signal's bar timestamp and drops to
//! zero past the signal lifetime. The decay factor also picks a size multiplier from
//! a three-step staircase. Once a symbol/timeframe has enough closed trades, its
//! rolling expectancy (in R) must clear `min_expectancy` or the signal is vetoed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Overlay, OverlayContext};
use crate::domain::TradingSignal;
use crate::error::{require_positive, require_unit, ConfigError, DataError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalQualityConfig {
    /// Decay rate per minute.
    pub decay_lambda: f64,
    pub lifetime_minutes: f64,
    pub fresh_threshold: f64,
    pub aging_threshold: f64,
    pub fresh_multiplier: f64,
    pub aging_multiplier: f64,
    pub stale_multiplier: f64,
    /// Minimum expectancy ratio, in R.
    pub min_expectancy: f64,
    pub min_samples: usize,
}

impl Default for SignalQualityConfig {
    fn default() -> Self {
        Self {
            decay_lambda: 0.3,
            lifetime_minutes: 5.0,
            fresh_threshold: 0.8,
            aging_threshold: 0.5,
            fresh_multiplier: 1.0,
            aging_multiplier: 0.85,
            stale_multiplier: 0.7,
            min_expectancy: 0.2,
            min_samples: 10,
        }
    }
}

impl SignalQualityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("signal_quality.decay_lambda", self.decay_lambda)?;
        require_positive("signal_quality.lifetime_minutes", self.lifetime_minutes)?;
        require_unit("signal_quality.fresh_threshold", self.fresh_threshold)?;
        require_unit("signal_quality.aging_threshold", self.aging_threshold)?;
        if self.aging_threshold > self.fresh_threshold {
            return Err(ConfigError::invalid(
                "signal_quality.aging_threshold",
                "must not exceed fresh_threshold",
            ));
        }
        require_positive("signal_quality.fresh_multiplier", self.fresh_multiplier)?;
        require_positive("signal_quality.aging_multiplier", self.aging_multiplier)?;
        require_positive("signal_quality.stale_multiplier", self.stale_multiplier)?;
        if !self.min_expectancy.is_finite() {
            return Err(ConfigError::invalid("signal_quality.min_expectancy", "must be finite"));
        }
        Ok(())
    }

    /// Decay factor after `elapsed_minutes`. 1.0 for a signal from the future, 0.0
    /// past the lifetime.
    pub fn decay(&self, elapsed_minutes: f64) -> f64 {
        if elapsed_minutes.is_nan() || elapsed_minutes > self.lifetime_minutes {
            return 0.0;
        }
        (-self.decay_lambda * elapsed_minutes.max(0.0)).exp()
    }

    pub fn size_multiplier(&self, decay: f64) -> f64 {
        if decay >= self.fresh_threshold {
            self.fresh_multiplier
        } else if decay >= self.aging_threshold {
            self.aging_multiplier
        } else {
            self.stale_multiplier
        }
    }
}

/// Minutes between the signal's timestamp and `now`, with sub-minute precision.
pub fn elapsed_minutes(from: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - from).num_milliseconds() as f64 / 60_000.0
}

/// Rolling expectancy over R-multiples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expectancy {
    pub samples: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    /// Mean loss magnitude (positive).
    pub avg_loss: f64,
    pub expectancy: f64,
}

impl Expectancy {
    pub fn from_outcomes(outcomes: &[f64]) -> Option<Self> {
        if outcomes.is_empty() {
            return None;
        }
        let wins: Vec<f64> = outcomes.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = outcomes
            .iter()
            .copied()
            .filter(|r| *r < 0.0)
            .map(f64::abs)
            .collect();
        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        let win_rate = wins.len() as f64 / outcomes.len() as f64;
        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);
        Some(Self {
            samples: outcomes.len(),
            win_rate,
            avg_win,
            avg_loss,
            expectancy: win_rate * avg_win - (1.0 - win_rate) * avg_loss,
        })
    }

    /// expectancy / avg_loss. None when there is no loss to normalize by.
    pub fn ratio(&self) -> Option<f64> {
        (self.avg_loss > 0.0).then(|| self.expectancy / self.avg_loss)
    }

    /// TAKE iff ratio ≥ `min_expectancy`. A missing ratio never passes.
    pub fn passes(&self, min_expectancy: f64) -> bool {
        self.ratio().is_some_and(|r| r >= min_expectancy)
    }
}

#[derive(Debug, Clone)]
pub struct SignalQualityOverlay {
    config: SignalQualityConfig,
}

impl SignalQualityOverlay {
    pub fn new(config: SignalQualityConfig) -> Self {
        Self { config }
    }
}

impl Overlay for SignalQualityOverlay {
    fn name(&self) -> &str {
        "signal_quality"
    }

    fn apply(&self, signal: &mut TradingSignal, ctx: &OverlayContext) -> Result<(), DataError> {
        let elapsed = elapsed_minutes(signal.timestamp, ctx.now);
        let decay = self.config.decay(elapsed);
        if decay <= 0.0 {
            signal.reject(
                self.name(),
                format!(
                    "signal expired after {elapsed:.1} min (lifetime {} min)",
                    self.config.lifetime_minutes
                ),
            );
            return Ok(());
        }

        let outcomes = ctx
            .portfolio
            .expectancy()
            .samples(&signal.symbol, signal.timeframe);
        if outcomes.len() >= self.config.min_samples {
            if let Some(stats) = Expectancy::from_outcomes(&outcomes) {
                if !stats.passes(self.config.min_expectancy) {
                    let ratio = stats
                        .ratio()
                        .map_or_else(|| "undefined".to_string(), |r| format!("{r:.3}"));
                    signal.reject(
                        self.name(),
                        format!(
                            "expectancy ratio {ratio} below {} over {} trades",
                            self.config.min_expectancy, stats.samples
                        ),
                    );
                    return Ok(());
                }
            }
        }

        let confidence = signal.confidence * decay;
        signal.apply_adjustment(
            self.name(),
            confidence,
            self.config.size_multiplier(decay),
            format!("decay={decay:.3} age={elapsed:.1}min"),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SignalAction, Timeframe};
    use crate::indicators::make_bars;
    use crate::portfolio::PortfolioState;
    use crate::testing::{sample_signal, sample_snapshot, t0};
    use chrono::Duration;

    fn apply_at(portfolio: &PortfolioState, minutes: i64) -> TradingSignal {
        let bars = make_bars(&[100.0; 3]);
        let ctx = OverlayContext {
            bars: &bars,
            higher_bars: None,
            portfolio,
            equity: 10_000.0,
            risk_fraction: 0.01,
            now: t0() + Duration::minutes(minutes),
        };
        let mut s = sample_signal(SignalAction::Buy, 0.8, sample_snapshot());
        SignalQualityOverlay::new(SignalQualityConfig::default())
            .apply(&mut s, &ctx)
            .unwrap();
        s
    }

    #[test]
    fn decay_values() {
        let cfg = SignalQualityConfig::default();
        assert_eq!(cfg.decay(0.0), 1.0);
        assert!((cfg.decay(1.0) - (-0.3f64).exp()).abs() < 1e-12);
        assert_eq!(cfg.decay(5.01), 0.0);
    }

    #[test]
    fn staircase() {
        let cfg = SignalQualityConfig::default();
        assert_eq!(cfg.size_multiplier(0.8), 1.0);
        assert_eq!(cfg.size_multiplier(0.79), 0.85);
        assert_eq!(cfg.size_multiplier(0.5), 0.85);
        assert_eq!(cfg.size_multiplier(0.49), 0.7);
    }

    #[test]
    fn fresh_signal_keeps_confidence() {
        let s = apply_at(&PortfolioState::default(), 0);
        assert_eq!(s.confidence, 0.8);
        assert_eq!(s.quant_adjustments.size_multiplier, 1.0);
    }

    #[test]
    fn two_minute_old_signal_decays() {
        // e^{-0.6} ≈ 0.549 → aging step
        let s = apply_at(&PortfolioState::default(), 2);
        assert!((s.confidence - 0.8 * (-0.6f64).exp()).abs() < 1e-12);
        assert_eq!(s.quant_adjustments.size_multiplier, 0.85);
    }

    #[test]
    fn expired_signal_is_rejected() {
        let s = apply_at(&PortfolioState::default(), 6);
        assert!(s.is_rejected());
        assert_eq!(s.confidence, 0.0);
        assert_eq!(s.action, SignalAction::Buy);
    }

    #[test]
    fn expectancy_from_outcomes() {
        // 6 wins of 2R and 4 losses of 1R: E = 1.2 − 0.4 = 0.8
        let mut outcomes = vec![2.0; 6];
        outcomes.extend([-1.0; 4]);
        let e = Expectancy::from_outcomes(&outcomes).unwrap();
        assert!((e.win_rate - 0.6).abs() < 1e-12);
        assert!((e.ratio().unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn expectancy_threshold_is_inclusive() {
        let at = |expectancy: f64| Expectancy {
            samples: 10,
            win_rate: 0.5,
            avg_win: 1.0,
            avg_loss: 1.0,
            expectancy,
        };
        assert!(at(0.2).passes(0.2));
        assert!(!at(0.199_999).passes(0.2));
        assert!(at(0.5).passes(0.2));
    }

    #[test]
    fn no_losses_is_treated_as_below_threshold() {
        let e = Expectancy::from_outcomes(&[1.0; 10]).unwrap();
        assert_eq!(e.ratio(), None);
        assert!(!e.passes(0.2));
    }

    #[test]
    fn poor_history_vetoes_signal() {
        let mut p = PortfolioState::default();
        for i in 0..10 {
            let r = if i < 3 { 1.0 } else { -1.0 };
            p.expectancy_mut().record("BTCUSDT", Timeframe::H1, r);
        }
        let s = apply_at(&p, 0);
        assert!(s.is_rejected());
    }

    #[test]
    fn too_few_samples_skips_expectancy() {
        let mut p = PortfolioState::default();
        for _ in 0..9 {
            p.expectancy_mut().record("BTCUSDT", Timeframe::H1, -1.0);
        }
        assert!(!apply_at(&p, 0).is_rejected());
    }
}
