//! DailyRiskState: per-UTC-day balance anchor for the daily loss limit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Balance bookkeeping for one UTC day.
///
/// `starting_balance` is fixed at the first activity of the day. On a new day it is
/// carried forward from the previous day's `current_balance`; the balance itself is
/// never reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub date: NaiveDate,
    pub starting_balance: f64,
    pub current_balance: f64,
    pub daily_pnl_pct: f64,
    pub limit_triggered: bool,
}

impl DailyRiskState {
    /// First-ever state: the day starts at `balance`.
    pub fn start(date: NaiveDate, balance: f64) -> Self {
        Self {
            date,
            starting_balance: balance,
            current_balance: balance,
            daily_pnl_pct: 0.0,
            limit_triggered: false,
        }
    }

    /// The state after observing `balance` at `now`.
    ///
    /// Pure: callers commit the returned value only once it has been persisted.
    pub fn advanced(&self, now: DateTime<Utc>, balance: f64) -> Self {
        let today = now.date_naive();
        let mut next = if today != self.date {
            Self {
                date: today,
                starting_balance: self.current_balance,
                current_balance: self.current_balance,
                daily_pnl_pct: 0.0,
                limit_triggered: false,
            }
        } else {
            self.clone()
        };
        next.current_balance = balance;
        next.daily_pnl_pct = next.pnl_fraction() * 100.0;
        next
    }

    /// (current − starting) / starting. Zero when the day started at zero balance.
    pub fn pnl_fraction(&self) -> f64 {
        if self.starting_balance > 0.0 {
            (self.current_balance - self.starting_balance) / self.starting_balance
        } else {
            0.0
        }
    }

    pub fn is_new_day(&self, now: DateTime<Utc>) -> bool {
        now.date_naive() != self.date
    }
}
