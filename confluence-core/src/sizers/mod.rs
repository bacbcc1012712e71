//! Position sizing: turn a gated signal into concrete entry/stop/target/size numbers.
//!
//! Sizers are portfolio-aware (they read the balance) but never decide direction.

pub mod fixed_risk;

pub use fixed_risk::{RiskCalculator, RiskConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{PositionSide, TradingSignal};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("signal is not actionable (HOLD, vetoed or zero weight)")]
    NotActionable,
    #[error("non-positive balance {0}")]
    NoBalance(f64),
    #[error("zero stop distance at entry {entry}")]
    ZeroStopDistance { entry: f64 },
    #[error("position value {value:.2} below exchange minimum {minimum:.2}")]
    BelowMinimum { value: f64, minimum: f64 },
}

/// The numbers an accepted signal would open a position with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionPlan {
    pub side: PositionSide,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
}

impl PositionPlan {
    pub fn notional(&self) -> f64 {
        self.size * self.entry_price
    }

    /// |entry − stop| × size.
    pub fn risk_amount(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs() * self.size
    }
}

pub trait Sizer: Send + Sync {
    /// Size `signal` against `balance`, filling its stop, target and size.
    fn size(&self, signal: &mut TradingSignal, balance: f64) -> Result<PositionPlan, SizingError>;

    fn name(&self) -> &str;
}
