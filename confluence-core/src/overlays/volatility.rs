//! Volatility overlay: ATR stops scaled by the realized-volatility regime.
//!
//! Volatility is the sample stdev of recent close-to-close returns, annualized with
//! √365 (crypto trades every day). The regime picks a stop multiplier and a size
//! multiplier; the stop sits `ATR × base_multiplier × regime_multiplier` from entry.
//!
//! Targets are `stop distance × reward_risk` unless smart targets are on, in which
//! case structural levels are tried first: the higher-timeframe swing extreme, then
//! the nearest round number, then the ATR extension.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Overlay, OverlayContext};
use crate::domain::{Bar, TradingSignal};
use crate::error::{require_positive, ConfigError, DataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityRegime {
    fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Extreme => 3,
        }
    }
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityConfig {
    /// Number of returns in the volatility window.
    pub lookback: usize,
    pub periods_per_year: f64,
    /// Upper bounds of the low, medium and high regimes (annualized).
    pub regime_thresholds: [f64; 3],
    /// Stop multiplier per regime: low, medium, high, extreme.
    pub stop_multipliers: [f64; 4],
    /// Size multiplier per regime: low, medium, high, extreme.
    pub size_multipliers: [f64; 4],
    pub base_multiplier: f64,
    pub reward_risk: f64,
    pub smart_targets: bool,
    pub min_reward_risk: f64,
    pub max_reward_risk: f64,
    /// Higher-timeframe bars scanned for the swing extreme.
    pub swing_lookback: usize,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            periods_per_year: 365.0,
            regime_thresholds: [0.40, 0.80, 1.20],
            stop_multipliers: [0.8, 1.0, 1.3, 1.6],
            size_multipliers: [1.0, 1.0, 0.75, 0.5],
            base_multiplier: 2.0,
            reward_risk: 2.0,
            smart_targets: false,
            min_reward_risk: 1.5,
            max_reward_risk: 4.0,
            swing_lookback: 20,
        }
    }
}

impl VolatilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback < 2 {
            return Err(ConfigError::invalid("volatility.lookback", "must be >= 2"));
        }
        require_positive("volatility.periods_per_year", self.periods_per_year)?;
        let [low, medium, high] = self.regime_thresholds;
        if !(low > 0.0 && low < medium && medium < high) {
            return Err(ConfigError::invalid(
                "volatility.regime_thresholds",
                "must be positive and strictly increasing",
            ));
        }
        for m in self.stop_multipliers {
            require_positive("volatility.stop_multipliers", m)?;
        }
        for m in self.size_multipliers {
            require_positive("volatility.size_multipliers", m)?;
        }
        require_positive("volatility.base_multiplier", self.base_multiplier)?;
        require_positive("volatility.reward_risk", self.reward_risk)?;
        if !(self.min_reward_risk > 0.0 && self.min_reward_risk <= self.max_reward_risk) {
            return Err(ConfigError::invalid(
                "volatility.min_reward_risk",
                "must be positive and not above max_reward_risk",
            ));
        }
        Ok(())
    }

    pub fn regime(&self, annualized_vol: f64) -> VolatilityRegime {
        let [low, medium, high] = self.regime_thresholds;
        if annualized_vol < low {
            VolatilityRegime::Low
        } else if annualized_vol < medium {
            VolatilityRegime::Medium
        } else if annualized_vol < high {
            VolatilityRegime::High
        } else {
            VolatilityRegime::Extreme
        }
    }
}

/// Annualized stdev of the last `lookback` close-to-close returns.
pub fn annualized_volatility(
    bars: &[Bar],
    lookback: usize,
    periods_per_year: f64,
) -> Result<f64, DataError> {
    if bars.len() < lookback + 1 {
        return Err(DataError::InsufficientHistory {
            required: lookback + 1,
            available: bars.len(),
        });
    }
    let window = &bars[bars.len() - lookback - 1..];
    let returns: Vec<f64> = window
        .windows(2)
        .map(|w| w[1].close / w[0].close - 1.0)
        .collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let vol = var.sqrt() * periods_per_year.sqrt();
    if !vol.is_finite() {
        return Err(DataError::UndefinedIndicator {
            name: "volatility".into(),
            index: bars.len() - 1,
        });
    }
    Ok(vol)
}

/// Step between round-number levels: one decimal order below the price's.
pub fn round_number_step(price: f64) -> f64 {
    10f64.powf(price.log10().floor() - 1.0)
}

#[derive(Debug, Clone)]
pub struct VolatilityOverlay {
    config: VolatilityConfig,
}

impl VolatilityOverlay {
    pub fn new(config: VolatilityConfig) -> Self {
        Self { config }
    }

    /// First structural level in the valid reward band, nearest to entry.
    ///
    /// `direction` is +1 for longs and -1 for shorts.
    fn smart_target(
        &self,
        entry: f64,
        stop_distance: f64,
        direction: f64,
        ctx: &OverlayContext,
    ) -> Option<(f64, &'static str)> {
        let min_reward = stop_distance * self.config.min_reward_risk;
        let max_reward = stop_distance * self.config.max_reward_risk;
        let mut candidates: Vec<(f64, &'static str)> = Vec::new();

        if let Some(higher) = ctx.higher_bars {
            let closed: Vec<&Bar> = higher.iter().filter(|b| b.timestamp <= ctx.now).collect();
            let recent = &closed[closed.len().saturating_sub(self.config.swing_lookback)..];
            let swing = if direction > 0.0 {
                recent.iter().map(|b| b.high).fold(f64::NAN, f64::max)
            } else {
                recent.iter().map(|b| b.low).fold(f64::NAN, f64::min)
            };
            if swing.is_finite() {
                candidates.push((swing, "htf_swing"));
            }
        }

        let step = round_number_step(entry);
        if step.is_finite() && step > 0.0 {
            let level = if direction > 0.0 {
                ((entry / step).floor() + 1.0) * step
            } else {
                ((entry / step).ceil() - 1.0) * step
            };
            candidates.push((level, "round_number"));
        }

        candidates
            .into_iter()
            .filter(|(level, _)| {
                let reward = direction * (level - entry);
                reward >= min_reward && reward <= max_reward
            })
            .fold(None, |best: Option<(f64, &'static str)>, c| match best {
                Some(b) if (b.0 - entry).abs() <= (c.0 - entry).abs() => Some(b),
                _ => Some(c),
            })
    }
}

impl Overlay for VolatilityOverlay {
    fn name(&self) -> &str {
        "volatility"
    }

    fn apply(&self, signal: &mut TradingSignal, ctx: &OverlayContext) -> Result<(), DataError> {
        let vol = annualized_volatility(ctx.bars, self.config.lookback, self.config.periods_per_year)?;
        let regime = self.config.regime(vol);
        let atr = signal.indicator_snapshot.atr_14;
        if !atr.is_finite() || atr <= 0.0 {
            return Err(DataError::UndefinedIndicator {
                name: "atr_14".into(),
                index: ctx.bars.len().saturating_sub(1),
            });
        }

        let direction = signal.action.sign();
        let entry = signal.entry_price;
        let distance =
            atr * self.config.base_multiplier * self.config.stop_multipliers[regime.index()];
        let stop = entry - direction * distance;
        if stop <= 0.0 {
            signal.reject(
                self.name(),
                format!("stop distance {distance:.4} leaves no valid stop below {entry}"),
            );
            return Ok(());
        }

        let fallback = entry + direction * distance * self.config.reward_risk;
        let (target, source) = if self.config.smart_targets {
            self.smart_target(entry, distance, direction, ctx)
                .unwrap_or((fallback, "atr_extension"))
        } else {
            (fallback, "reward_risk")
        };

        signal.stop_loss = Some(stop);
        signal.take_profit = Some(target);
        let confidence = signal.confidence;
        signal.apply_adjustment(
            self.name(),
            confidence,
            self.config.size_multipliers[regime.index()],
            format!("regime={regime} vol={vol:.3} stop={stop:.4} target={target:.4} ({source})"),
        );
        Ok(())
    }
}
