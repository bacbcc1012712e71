//! Quant overlays: post-generation adjustments to a directional signal.
//!
//! Overlays run in a fixed order (volatility, correlation/heat, signal quality,
//! mean reversion). Each may lower confidence, scale the size multiplier or veto the
//! signal outright, but none may change its action. Overlays read portfolio state;
//! they never write it.

pub mod correlation;
pub mod mean_reversion;
pub mod signal_quality;
pub mod volatility;

pub use correlation::{CorrelationConfig, CorrelationOverlay};
pub use mean_reversion::{Extension, MeanReversionConfig, MeanReversionOverlay, Severity};
pub use signal_quality::{Expectancy, SignalQualityConfig, SignalQualityOverlay};
pub use volatility::{VolatilityConfig, VolatilityOverlay, VolatilityRegime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Bar, SignalAction, TradingSignal};
use crate::error::{ConfigError, DataError};
use crate::portfolio::PortfolioState;

/// Read-only inputs an overlay may consult.
#[derive(Debug, Clone, Copy)]
pub struct OverlayContext<'a> {
    /// Bars of the signal's symbol and timeframe, ending at the signal bar.
    pub bars: &'a [Bar],
    /// Same symbol on the next timeframe up, if available.
    pub higher_bars: Option<&'a [Bar]>,
    pub portfolio: &'a PortfolioState,
    pub equity: f64,
    /// Fraction of equity the prospective position would risk.
    pub risk_fraction: f64,
    pub now: DateTime<Utc>,
}

pub trait Overlay: Send + Sync {
    fn name(&self) -> &str;

    /// Adjust `signal` in place. `DataError` means the overlay lacked the history it
    /// needs; the caller drops the signal for this bar.
    fn apply(&self, signal: &mut TradingSignal, ctx: &OverlayContext) -> Result<(), DataError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub volatility: VolatilityConfig,
    pub correlation: CorrelationConfig,
    pub signal_quality: SignalQualityConfig,
    pub mean_reversion: MeanReversionConfig,
}

impl OverlayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.volatility.validate()?;
        self.correlation.validate()?;
        self.signal_quality.validate()?;
        self.mean_reversion.validate()
    }
}

/// The four overlays in their fixed order.
pub struct OverlayPipeline {
    correlation: CorrelationOverlay,
    overlays: Vec<Box<dyn Overlay>>,
}

impl OverlayPipeline {
    pub fn new(config: OverlayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: OverlayConfig) -> Self {
        let correlation = CorrelationOverlay::new(config.correlation);
        let overlays: Vec<Box<dyn Overlay>> = vec![
            Box::new(VolatilityOverlay::new(config.volatility)),
            Box::new(correlation.clone()),
            Box::new(SignalQualityOverlay::new(config.signal_quality)),
            Box::new(MeanReversionOverlay::new(config.mean_reversion)),
        ];
        Self {
            correlation,
            overlays,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.overlays.iter().map(|o| o.name()).collect()
    }

    /// The correlation overlay, for cache refreshes ahead of `apply`.
    pub fn correlation(&self) -> &CorrelationOverlay {
        &self.correlation
    }

    /// Run every overlay in order. HOLD passes through untouched; a veto stops the
    /// remaining overlays.
    pub fn apply(&self, signal: &mut TradingSignal, ctx: &OverlayContext) -> Result<(), DataError> {
        if signal.action == SignalAction::Hold {
            return Ok(());
        }
        let action = signal.action;
        for overlay in &self.overlays {
            overlay.apply(signal, ctx)?;
            debug_assert_eq!(signal.action, action, "{} flipped the action", overlay.name());
            if signal.is_rejected() {
                debug!(
                    symbol = %signal.symbol,
                    overlay = overlay.name(),
                    "signal vetoed by overlay"
                );
                break;
            }
        }
        Ok(())
    }
}

impl Default for OverlayPipeline {
    fn default() -> Self {
        Self::build(OverlayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;
    use crate::testing::{sample_signal, sample_snapshot, t0};

    #[test]
    fn overlay_order_is_fixed() {
        let p = OverlayPipeline::default();
        assert_eq!(
            p.names(),
            ["volatility", "correlation", "signal_quality", "mean_reversion"]
        );
    }

    #[test]
    fn hold_passes_through() {
        let p = OverlayPipeline::default();
        let bars = make_bars(&[100.0; 60]);
        let portfolio = PortfolioState::default();
        let ctx = OverlayContext {
            bars: &bars,
            higher_bars: None,
            portfolio: &portfolio,
            equity: 10_000.0,
            risk_fraction: 0.01,
            now: t0(),
        };
        let mut s = sample_signal(SignalAction::Hold, 0.4, sample_snapshot());
        p.apply(&mut s, &ctx).unwrap();
        assert!(s.quant_adjustments.applied.is_empty());
        assert!(s.stop_loss.is_none());
    }

    #[test]
    fn fresh_buy_gets_stop_and_target() {
        let p = OverlayPipeline::default();
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let bars = make_bars(&closes);
        let portfolio = PortfolioState::default();
        let ctx = OverlayContext {
            bars: &bars,
            higher_bars: None,
            portfolio: &portfolio,
            equity: 10_000.0,
            risk_fraction: 0.01,
            now: t0(),
        };
        let mut s = sample_signal(SignalAction::Buy, 0.7, sample_snapshot());
        p.apply(&mut s, &ctx).unwrap();
        assert_eq!(s.action, SignalAction::Buy);
        assert!(!s.is_rejected());
        assert!(s.stop_loss.unwrap() < s.entry_price);
        assert!(s.take_profit.unwrap() > s.entry_price);
        assert_eq!(s.quant_adjustments.applied.len(), 4);
    }
}
