use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bar::Timeframe;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A simulated position. At most one is open per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub side: PositionSide,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        side: PositionSide,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        size: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            side,
            entry_price,
            entry_time,
            size,
            stop_loss,
            take_profit,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Entry notional (size × entry price).
    pub fn notional(&self) -> f64 {
        self.size * self.entry_price
    }

    /// Capital lost if the stop is hit exactly: |entry − stop| × size.
    pub fn risk_amount(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs() * self.size
    }

    /// PnL if the position were closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.size
    }

    /// Mark-to-market at `price`.
    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = self.pnl_at(price);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn long(entry: f64, stop: f64) -> Position {
        Position::open(
            "BTCUSDT",
            Timeframe::H1,
            PositionSide::Long,
            entry,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            0.5,
            stop,
            entry + 2.0 * (entry - stop),
        )
    }

    #[test]
    fn long_pnl_follows_price() {
        let mut pos = long(100.0, 95.0);
        pos.mark(110.0);
        assert!((pos.unrealized_pnl - 5.0).abs() < 1e-12);
    }

    #[test]
    fn short_pnl_is_mirrored() {
        let mut pos = long(100.0, 105.0);
        pos.side = PositionSide::Short;
        assert!((pos.pnl_at(90.0) - 5.0).abs() < 1e-12);
        assert!((pos.pnl_at(110.0) + 5.0).abs() < 1e-12);
    }

    #[test]
    fn risk_amount_uses_stop_distance() {
        let pos = long(100.0, 96.0);
        assert!((pos.risk_amount() - 2.0).abs() < 1e-12);
        assert!((pos.notional() - 50.0).abs() < 1e-12);
    }
}
