//! Trade: an immutable record of a closed position.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::bar::Timeframe;
use super::position::PositionSide;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    TimeLimit,
    SessionClose,
    Manual,
    OppositeSignal,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::TimeLimit => "TIME_LIMIT",
            CloseReason::SessionClose => "SESSION_CLOSE",
            CloseReason::Manual => "MANUAL",
            CloseReason::OppositeSignal => "OPPOSITE_SIGNAL",
        };
        f.write_str(s)
    }
}

/// A complete round-trip trade: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub side: PositionSide,

    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,

    pub size: f64,
    pub realized_pnl: f64,
    /// Realized PnL as a percentage of entry notional.
    pub pnl_pct: f64,
    /// Capital that was at risk at entry (|entry − stop| × size).
    pub initial_risk: f64,

    #[serde(with = "duration_secs")]
    pub hold_time: Duration,
    pub close_reason: CloseReason,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }

    /// Realized PnL in units of initial risk. None when no risk was recorded.
    pub fn r_multiple(&self) -> Option<f64> {
        if self.initial_risk > 0.0 {
            Some(self.realized_pnl / self.initial_risk)
        } else {
            None
        }
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}
