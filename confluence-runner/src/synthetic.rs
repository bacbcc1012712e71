//! Synthetic bars for tests, benches and dry runs.
//!
//! A seeded random walk whose drift rotates slowly, so a series passes through
//! trending, ranging and reversing stretches. The seed comes from the symbol name:
//! the same symbol always yields the same bars.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use confluence_core::domain::{Bar, Timeframe};

use crate::market_data::InMemoryMarketData;

/// Walk parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkParams {
    pub start_price: f64,
    /// Per-bar noise, as a fraction of price.
    pub volatility: f64,
    /// Peak per-bar drift, as a fraction of price.
    pub drift: f64,
    /// Bars per full drift cycle.
    pub cycle_bars: f64,
}

impl Default for WalkParams {
    fn default() -> Self {
        Self {
            start_price: 100.0,
            volatility: 0.004,
            drift: 0.002,
            cycle_bars: 160.0,
        }
    }
}

fn rng_for(symbol: &str) -> StdRng {
    StdRng::from_seed(*blake3::hash(symbol.as_bytes()).as_bytes())
}

pub fn synthetic_bars(
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    count: usize,
) -> Vec<Bar> {
    synthetic_bars_with(symbol, timeframe, start, count, WalkParams::default())
}

pub fn synthetic_bars_with(
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    count: usize,
    params: WalkParams,
) -> Vec<Bar> {
    let mut rng = rng_for(symbol);
    let phase: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let step = timeframe.duration();
    let mut price = params.start_price;
    let mut bars = Vec::with_capacity(count);

    for i in 0..count {
        let drift = params.drift * (phase + i as f64 * std::f64::consts::TAU / params.cycle_bars).sin();
        let ret = drift + rng.gen_range(-params.volatility..params.volatility);
        let open = price;
        let close = (price * (1.0 + ret)).max(params.start_price * 0.01);
        let wick = params.volatility * 0.5;
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..wick));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..wick));
        let volume = rng.gen_range(500.0..2_000.0) * (1.0 + 20.0 * ret.abs() / params.volatility);
        bars.push(Bar::new(start + step * i as i32, open, high, low, close, volume));
        price = close;
    }
    bars
}

/// In-memory data for `symbols`, each with its higher-timeframe resample.
pub fn synthetic_market(
    symbols: &[&str],
    timeframe: Timeframe,
    start: DateTime<Utc>,
    count: usize,
) -> InMemoryMarketData {
    let mut md = InMemoryMarketData::new();
    for symbol in symbols {
        md.insert_with_higher(symbol, timeframe, synthetic_bars(symbol, timeframe, start, count));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MarketData;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn same_symbol_same_bars() {
        let a = synthetic_bars("BTCUSDT", Timeframe::H1, t0(), 200);
        let b = synthetic_bars("BTCUSDT", Timeframe::H1, t0(), 200);
        let c = synthetic_bars("ETHUSDT", Timeframe::H1, t0(), 200);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bars_are_sane_and_spaced() {
        let bars = synthetic_bars("SOLUSDT", Timeframe::M15, t0(), 500);
        assert!(bars.iter().all(Bar::is_sane));
        for w in bars.windows(2) {
            assert_eq!(w[1].timestamp - w[0].timestamp, Timeframe::M15.duration());
            assert_eq!(w[1].open, w[0].close);
        }
    }

    #[test]
    fn market_carries_higher_timeframe() {
        let md = synthetic_market(&["BTCUSDT", "ETHUSDT"], Timeframe::H1, t0(), 48);
        assert_eq!(md.history("ETHUSDT", Timeframe::H1).unwrap().len(), 48);
        assert_eq!(md.history("ETHUSDT", Timeframe::H4).unwrap().len(), 12);
    }
}
