//! Position validator: absolute size, balance, per-position risk and the exchange
//! minimum. Boundary values are accepted.

use super::{GuardContext, SafetyGuard, SafetyViolation};

#[derive(Debug, Clone)]
pub struct PositionValidator {
    max_position_size: f64,
    max_portfolio_risk: f64,
    min_position_value: f64,
}

impl PositionValidator {
    pub fn new(max_position_size: f64, max_portfolio_risk: f64, min_position_value: f64) -> Self {
        Self {
            max_position_size,
            max_portfolio_risk,
            min_position_value,
        }
    }
}

impl SafetyGuard for PositionValidator {
    fn name(&self) -> &str {
        "position_validator"
    }

    fn check(&self, ctx: &GuardContext) -> Result<(), SafetyViolation> {
        let value = ctx.position_value;
        if value > self.max_position_size {
            return Err(SafetyViolation::PositionTooLarge {
                value,
                max: self.max_position_size,
            });
        }
        if value > ctx.balance {
            return Err(SafetyViolation::InsufficientBalance {
                value,
                balance: ctx.balance,
            });
        }
        let risk = if ctx.balance > 0.0 {
            ctx.risk_amount / ctx.balance
        } else {
            f64::INFINITY
        };
        if risk > self.max_portfolio_risk {
            return Err(SafetyViolation::PortfolioRiskExceeded {
                risk,
                max: self.max_portfolio_risk,
            });
        }
        if value < self.min_position_value {
            return Err(SafetyViolation::PositionTooSmall {
                value,
                min: self.min_position_value,
            });
        }
        Ok(())
    }
}
