//! Daily loss tracker.
//!
//! The day's starting balance is fixed at its first observation and carried from the
//! previous day's ending balance. Once the loss reaches the limit the day is halted:
//! `limit_triggered` latches until the next UTC day, even if the balance recovers.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{GuardContext, SafetyGuard, SafetyViolation};
use crate::domain::DailyRiskState;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct DailyLossTracker {
    max_daily_loss_percent: f64,
}

impl DailyLossTracker {
    pub fn new(max_daily_loss_percent: f64) -> Self {
        Self {
            max_daily_loss_percent,
        }
    }

    pub fn limit_fraction(&self) -> f64 {
        self.max_daily_loss_percent / 100.0
    }

    fn breached(&self, state: &DailyRiskState) -> bool {
        state.pnl_fraction() <= -self.limit_fraction() + EPSILON
    }

    /// Advance `state` to `now` and `balance`, latching the halt on a breach.
    ///
    /// Pure: the caller commits the returned state.
    pub fn observe(
        &self,
        state: &DailyRiskState,
        now: DateTime<Utc>,
        balance: f64,
    ) -> DailyRiskState {
        let mut next = state.advanced(now, balance);
        if !next.limit_triggered && self.breached(&next) {
            next.limit_triggered = true;
            warn!(
                date = %next.date,
                pnl_pct = next.daily_pnl_pct,
                limit_pct = self.max_daily_loss_percent,
                "daily loss limit reached, trading halted for the day"
            );
        }
        next
    }
}

impl SafetyGuard for DailyLossTracker {
    fn name(&self) -> &str {
        "daily_loss"
    }

    fn check(&self, ctx: &GuardContext) -> Result<(), SafetyViolation> {
        if ctx.daily.limit_triggered || self.breached(ctx.daily) {
            return Err(SafetyViolation::DailyLossLimit {
                pnl_pct: ctx.daily.pnl_fraction() * 100.0,
                limit_pct: self.max_daily_loss_percent,
            });
        }
        Ok(())
    }
}
