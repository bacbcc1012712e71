//! Mean-reversion sizing.
//!
//! Bollinger %B and the Z-score of price against a longer mean place the bar on an
//! overbought/oversold scale. Signals that chase the extension are sized down;
//! signals that trade back toward the mean are sized up. Confidence is untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Overlay, OverlayContext};
use crate::domain::{Bar, SignalAction, TradingSignal};
use crate::error::{require_positive, ConfigError, DataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Extreme,
}

impl Severity {
    fn index(self) -> usize {
        match self {
            Self::Mild => 0,
            Self::Moderate => 1,
            Self::Extreme => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "severity")]
pub enum Extension {
    Neutral,
    Overbought(Severity),
    Oversold(Severity),
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neutral => f.write_str("neutral"),
            Self::Overbought(s) => write!(f, "overbought/{s:?}"),
            Self::Oversold(s) => write!(f, "oversold/{s:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    pub z_lookback: usize,
    /// %B at or above which the bar is mild, moderate, extreme overbought.
    /// Oversold mirrors these around 0.5.
    pub percent_b_levels: [f64; 3],
    pub z_levels: [f64; 3],
    /// Size multipliers when chasing the extension, by severity.
    pub chasing_multipliers: [f64; 3],
    /// Size multipliers when trading back toward the mean, by severity.
    pub reverting_multipliers: [f64; 3],
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            z_lookback: 50,
            percent_b_levels: [0.8, 0.9, 0.95],
            z_levels: [1.5, 2.0, 2.5],
            chasing_multipliers: [0.85, 0.7, 0.5],
            reverting_multipliers: [1.15, 1.3, 1.5],
        }
    }
}

fn increasing(levels: &[f64; 3]) -> bool {
    levels[0] < levels[1] && levels[1] < levels[2]
}

impl MeanReversionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.z_lookback < 2 {
            return Err(ConfigError::invalid("mean_reversion.z_lookback", "must be >= 2"));
        }
        if !increasing(&self.percent_b_levels)
            || self.percent_b_levels[0] <= 0.5
            || self.percent_b_levels[2] > 1.0
        {
            return Err(ConfigError::invalid(
                "mean_reversion.percent_b_levels",
                "must be increasing within (0.5, 1]",
            ));
        }
        if !increasing(&self.z_levels) || self.z_levels[0] <= 0.0 {
            return Err(ConfigError::invalid(
                "mean_reversion.z_levels",
                "must be positive and increasing",
            ));
        }
        for m in self.chasing_multipliers.iter().chain(&self.reverting_multipliers) {
            require_positive("mean_reversion.multipliers", *m)?;
        }
        Ok(())
    }

    fn severity(value: f64, levels: &[f64; 3]) -> Option<Severity> {
        if value >= levels[2] {
            Some(Severity::Extreme)
        } else if value >= levels[1] {
            Some(Severity::Moderate)
        } else if value >= levels[0] {
            Some(Severity::Mild)
        } else {
            None
        }
    }

    /// Classify a bar from its %B (clamped to [0, 1]) and Z-score.
    ///
    /// Each measure votes a severity; the stronger vote wins. If the two measures
    /// disagree on direction with equal severity the bar is neutral.
    pub fn classify(&self, percent_b: f64, z_score: f64) -> Extension {
        let pb = if percent_b.is_nan() {
            0.5
        } else {
            percent_b.clamp(0.0, 1.0)
        };
        let z = if z_score.is_finite() { z_score } else { 0.0 };

        let overbought = Self::severity(pb, &self.percent_b_levels)
            .max(Self::severity(z, &self.z_levels));
        let oversold = Self::severity(1.0 - pb, &self.percent_b_levels)
            .max(Self::severity(-z, &self.z_levels));

        match (overbought, oversold) {
            (Some(o), None) => Extension::Overbought(o),
            (None, Some(u)) => Extension::Oversold(u),
            (Some(o), Some(u)) if o > u => Extension::Overbought(o),
            (Some(o), Some(u)) if u > o => Extension::Oversold(u),
            _ => Extension::Neutral,
        }
    }

    /// Size multiplier for `action` given the bar's extension.
    pub fn size_multiplier(&self, action: SignalAction, extension: Extension) -> f64 {
        match (action, extension) {
            (SignalAction::Buy, Extension::Overbought(s))
            | (SignalAction::Sell, Extension::Oversold(s)) => self.chasing_multipliers[s.index()],
            (SignalAction::Buy, Extension::Oversold(s))
            | (SignalAction::Sell, Extension::Overbought(s)) => {
                self.reverting_multipliers[s.index()]
            }
            _ => 1.0,
        }
    }
}

/// Z-score of `price` against the mean and sample stdev of the last `lookback`
/// closes. Zero when the window is flat.
pub fn z_score(bars: &[Bar], price: f64, lookback: usize) -> Result<f64, DataError> {
    if bars.len() < lookback {
        return Err(DataError::InsufficientHistory {
            required: lookback,
            available: bars.len(),
        });
    }
    let window = &bars[bars.len() - lookback..];
    let n = lookback as f64;
    let mean = window.iter().map(|b| b.close).sum::<f64>() / n;
    let var = window.iter().map(|b| (b.close - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if !std.is_finite() {
        return Err(DataError::UndefinedIndicator {
            name: "z_score".into(),
            index: bars.len() - 1,
        });
    }
    Ok(if std > 0.0 { (price - mean) / std } else { 0.0 })
}

#[derive(Debug, Clone)]
pub struct MeanReversionOverlay {
    config: MeanReversionConfig,
}

impl MeanReversionOverlay {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }
}

impl Overlay for MeanReversionOverlay {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn apply(&self, signal: &mut TradingSignal, ctx: &OverlayContext) -> Result<(), DataError> {
        let percent_b = signal.indicator_snapshot.percent_b();
        let z = z_score(ctx.bars, signal.entry_price, self.config.z_lookback)?;
        let extension = self.config.classify(percent_b, z);
        let multiplier = self.config.size_multiplier(signal.action, extension);
        let confidence = signal.confidence;
        signal.apply_adjustment(
            self.name(),
            confidence,
            multiplier,
            format!("%B={percent_b:.3} z={z:.2} {extension}"),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;

    #[test]
    fn extreme_overbought_buy_is_halved() {
        let cfg = MeanReversionConfig::default();
        let ext = cfg.classify(0.95, 0.0);
        assert_eq!(ext, Extension::Overbought(Severity::Extreme));
        assert_eq!(cfg.size_multiplier(SignalAction::Buy, ext), 0.5);
        assert_eq!(cfg.size_multiplier(SignalAction::Sell, ext), 1.5);
    }

    #[test]
    fn severity_ladder() {
        let cfg = MeanReversionConfig::default();
        assert_eq!(cfg.classify(0.5, 0.0), Extension::Neutral);
        assert_eq!(cfg.classify(0.82, 0.0), Extension::Overbought(Severity::Mild));
        assert_eq!(cfg.classify(0.5, 2.1), Extension::Overbought(Severity::Moderate));
        assert_eq!(cfg.classify(0.15, 0.0), Extension::Oversold(Severity::Mild));
        assert_eq!(cfg.classify(0.5, -2.6), Extension::Oversold(Severity::Extreme));
    }

    #[test]
    fn percent_b_is_clamped() {
        let cfg = MeanReversionConfig::default();
        assert_eq!(cfg.classify(1.4, 0.0), Extension::Overbought(Severity::Extreme));
        assert_eq!(cfg.classify(-0.3, 0.0), Extension::Oversold(Severity::Extreme));
    }

    #[test]
    fn stronger_measure_wins_on_disagreement() {
        let cfg = MeanReversionConfig::default();
        // %B says mild overbought, Z says extreme oversold
        assert_eq!(cfg.classify(0.82, -2.6), Extension::Oversold(Severity::Extreme));
        // equal severities in opposite directions cancel
        assert_eq!(cfg.classify(0.82, -1.6), Extension::Neutral);
    }

    #[test]
    fn oversold_sell_chases() {
        let cfg = MeanReversionConfig::default();
        let ext = Extension::Oversold(Severity::Moderate);
        assert_eq!(cfg.size_multiplier(SignalAction::Sell, ext), 0.7);
        assert_eq!(cfg.size_multiplier(SignalAction::Buy, ext), 1.3);
        assert_eq!(cfg.size_multiplier(SignalAction::Hold, ext), 1.0);
    }

    #[test]
    fn z_score_against_window() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        // mean 2, sample std 1
        assert!((z_score(&bars, 4.0, 3).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(z_score(&make_bars(&[5.0; 4]), 9.0, 4).unwrap(), 0.0);
        assert!(z_score(&bars, 4.0, 50).is_err());
    }
}
