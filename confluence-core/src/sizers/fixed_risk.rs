//! Fixed-fractional risk sizing.
//!
//! # Formula
//! ```text
//! risk_amount   = balance * fixed_risk_fraction
//! stop_distance = |entry - stop|
//! size          = risk_amount / stop_distance * overlay_multiplier
//! ```
//! then capped so the notional never exceeds `max_position_value` or the balance.
//!
//! With `pure_risk` on the overlay multiplier is ignored and only the fixed-fraction
//! formula applies.
//!
//! # Example
//! - Balance: $10,000, risk 1% ($100)
//! - Entry $100, stop $96 (distance $4)
//! - Size: $100 / $4 = 25 units ($2,500 notional)

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PositionPlan, Sizer, SizingError};
use crate::domain::TradingSignal;
use crate::error::{require_positive, ConfigError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub fixed_risk_fraction: f64,
    /// Exchange minimum notional.
    pub min_notional: f64,
    pub max_position_value: f64,
    /// Ignore every overlay size multiplier.
    pub pure_risk: bool,
    /// Stop distance, as a fraction of entry, when no overlay set a stop.
    pub fallback_stop_fraction: f64,
    pub reward_risk: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            fixed_risk_fraction: 0.01,
            min_notional: 5.0,
            max_position_value: 1_000.0,
            pure_risk: false,
            fallback_stop_fraction: 0.02,
            reward_risk: 2.0,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("risk.fixed_risk_fraction", self.fixed_risk_fraction)?;
        if self.fixed_risk_fraction >= 1.0 {
            return Err(ConfigError::invalid(
                "risk.fixed_risk_fraction",
                "must be below 1.0",
            ));
        }
        require_positive("risk.min_notional", self.min_notional)?;
        require_positive("risk.max_position_value", self.max_position_value)?;
        if self.min_notional > self.max_position_value {
            return Err(ConfigError::invalid(
                "risk.min_notional",
                "must not exceed max_position_value",
            ));
        }
        require_positive("risk.fallback_stop_fraction", self.fallback_stop_fraction)?;
        require_positive("risk.reward_risk", self.reward_risk)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskCalculator {
    config: RiskConfig,
}

impl RiskCalculator {
    pub fn new(config: RiskConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn risk_fraction(&self) -> f64 {
        self.config.fixed_risk_fraction
    }

    pub fn is_pure_risk(&self) -> bool {
        self.config.pure_risk
    }
}

impl Sizer for RiskCalculator {
    fn size(&self, signal: &mut TradingSignal, balance: f64) -> Result<PositionPlan, SizingError> {
        if !signal.is_actionable() {
            return Err(SizingError::NotActionable);
        }
        let side = signal.action.entry_side().ok_or(SizingError::NotActionable)?;
        if !(balance > 0.0) {
            return Err(SizingError::NoBalance(balance));
        }

        let entry = signal.entry_price;
        let direction = side.sign();
        let stop = signal
            .stop_loss
            .unwrap_or(entry * (1.0 - direction * self.config.fallback_stop_fraction));
        let distance = (entry - stop).abs();
        if !(distance > 0.0) {
            return Err(SizingError::ZeroStopDistance { entry });
        }
        let target = signal
            .take_profit
            .unwrap_or(entry + direction * distance * self.config.reward_risk);

        let multiplier = if self.config.pure_risk {
            1.0
        } else {
            signal.quant_adjustments.size_multiplier
        };
        let risk_amount = balance * self.config.fixed_risk_fraction;
        let raw = risk_amount / distance * multiplier;
        let cap = (self.config.max_position_value / entry).min(balance / entry);
        let size = raw.min(cap);

        let value = size * entry;
        if value < self.config.min_notional {
            return Err(SizingError::BelowMinimum {
                value,
                minimum: self.config.min_notional,
            });
        }

        debug!(
            symbol = %signal.symbol,
            size,
            raw,
            multiplier,
            pure_risk = self.config.pure_risk,
            "position sized"
        );

        signal.stop_loss = Some(stop);
        signal.take_profit = Some(target);
        signal.position_size = Some(size);
        Ok(PositionPlan {
            side,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            size,
        })
    }

    fn name(&self) -> &str {
        "fixed_risk"
    }
}
