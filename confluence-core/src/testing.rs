//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{SignalAction, Timeframe, TradingSignal};
use crate::indicators::IndicatorSnapshot;
use crate::phase::MarketPhase;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// A fully defined snapshot that matches no phase rule and no confluence rule.
pub fn sample_snapshot() -> IndicatorSnapshot {
    IndicatorSnapshot {
        close: 100.0,
        volume: 1000.0,
        sma_20: 100.0,
        sma_50: 100.0,
        ema_20: 100.0,
        ema_50: 100.0,
        rsi_14: 50.0,
        macd_line: 0.0,
        macd_signal: 0.0,
        macd_histogram: 0.0,
        bb_upper: 105.0,
        bb_middle: 100.0,
        bb_lower: 95.0,
        bb_width: 0.1,
        atr_14: 2.0,
        volume_ratio_20: 1.0,
        momentum_5: 0.0,
        momentum_10: 0.0,
        momentum_20: 0.0,
    }
}

pub fn sample_signal(
    action: SignalAction,
    confidence: f64,
    snapshot: IndicatorSnapshot,
) -> TradingSignal {
    TradingSignal::new(
        t0(),
        "BTCUSDT",
        Timeframe::H1,
        action,
        confidence,
        snapshot.close,
        MarketPhase::Transition,
        snapshot,
    )
}
