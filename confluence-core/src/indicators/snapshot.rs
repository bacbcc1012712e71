//! Indicator engine and per-bar snapshots.
//!
//! The engine precomputes every standard indicator once per bar series. A snapshot
//! is the flat per-bar view the phase classifier, generator and overlays read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    Atr, Bollinger, BollingerBand, Ema, Indicator, IndicatorValues, Macd, MacdLine, Momentum,
    Rsi, Sma, VolumeRatio,
};
use crate::domain::Bar;
use crate::error::DataError;

/// All indicator values for one bar. Fields are NaN until their lookback is met.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub volume: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub rsi_14: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    pub atr_14: f64,
    pub volume_ratio_20: f64,
    pub momentum_5: f64,
    pub momentum_10: f64,
    pub momentum_20: f64,
}

impl IndicatorSnapshot {
    /// A snapshot with every indicator undefined.
    pub fn undefined(close: f64, volume: f64) -> Self {
        Self {
            close,
            volume,
            sma_20: f64::NAN,
            sma_50: f64::NAN,
            ema_20: f64::NAN,
            ema_50: f64::NAN,
            rsi_14: f64::NAN,
            macd_line: f64::NAN,
            macd_signal: f64::NAN,
            macd_histogram: f64::NAN,
            bb_upper: f64::NAN,
            bb_middle: f64::NAN,
            bb_lower: f64::NAN,
            bb_width: f64::NAN,
            atr_14: f64::NAN,
            volume_ratio_20: f64::NAN,
            momentum_5: f64::NAN,
            momentum_10: f64::NAN,
            momentum_20: f64::NAN,
        }
    }

    fn fields(&self) -> [(&'static str, f64); 19] {
        [
            ("close", self.close),
            ("volume", self.volume),
            ("sma_20", self.sma_20),
            ("sma_50", self.sma_50),
            ("ema_20", self.ema_20),
            ("ema_50", self.ema_50),
            ("rsi_14", self.rsi_14),
            ("macd_line", self.macd_line),
            ("macd_signal", self.macd_signal),
            ("macd_histogram", self.macd_histogram),
            ("bb_upper", self.bb_upper),
            ("bb_middle", self.bb_middle),
            ("bb_lower", self.bb_lower),
            ("bb_width", self.bb_width),
            ("atr_14", self.atr_14),
            ("volume_ratio_20", self.volume_ratio_20),
            ("momentum_5", self.momentum_5),
            ("momentum_10", self.momentum_10),
            ("momentum_20", self.momentum_20),
        ]
    }

    /// True when every value is finite. Downstream components act only on defined snapshots.
    pub fn is_defined(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_finite())
    }

    /// Name of the first undefined value, if any.
    pub fn first_undefined(&self) -> Option<&'static str> {
        self.fields()
            .iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(name, _)| *name)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.fields()
            .iter()
            .map(|(n, v)| (n.to_string(), *v))
            .collect()
    }

    /// Bollinger %B, clamped to [0, 1]. 0.5 when the band has collapsed.
    pub fn percent_b(&self) -> f64 {
        let span = self.bb_upper - self.bb_lower;
        if !span.is_finite() || span <= 0.0 {
            return 0.5;
        }
        ((self.close - self.bb_lower) / span).clamp(0.0, 1.0)
    }
}

/// Computes the standard indicator set over a bar series.
pub struct IndicatorEngine {
    indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorEngine {
    /// SMA/EMA 20 and 50, RSI 14, MACD 12/26/9, Bollinger 20/2, ATR 14,
    /// volume ratio 20 and momentum 5/10/20.
    pub fn standard() -> Self {
        let indicators: Vec<Box<dyn Indicator>> = vec![
            Box::new(Sma::new(20)),
            Box::new(Sma::new(50)),
            Box::new(Ema::new(20)),
            Box::new(Ema::new(50)),
            Box::new(Rsi::new(14)),
            Box::new(Macd::standard(MacdLine::Line)),
            Box::new(Macd::standard(MacdLine::Signal)),
            Box::new(Macd::standard(MacdLine::Histogram)),
            Box::new(Bollinger::new(20, 2.0, BollingerBand::Upper)),
            Box::new(Bollinger::new(20, 2.0, BollingerBand::Middle)),
            Box::new(Bollinger::new(20, 2.0, BollingerBand::Lower)),
            Box::new(Bollinger::new(20, 2.0, BollingerBand::Width)),
            Box::new(Atr::new(14)),
            Box::new(VolumeRatio::new(20)),
            Box::new(Momentum::new(5)),
            Box::new(Momentum::new(10)),
            Box::new(Momentum::new(20)),
        ];
        Self { indicators }
    }

    /// Index of the first bar at which every indicator is defined.
    pub fn warmup_bars(&self) -> usize {
        self.indicators
            .iter()
            .map(|i| i.lookback())
            .max()
            .unwrap_or(0)
    }

    pub fn compute(&self, bars: &[Bar]) -> IndicatorSeries {
        let mut values = IndicatorValues::new();
        for indicator in &self.indicators {
            values.insert(indicator.name(), indicator.compute(bars));
        }
        IndicatorSeries {
            closes: bars.iter().map(|b| b.close).collect(),
            volumes: bars.iter().map(|b| b.volume).collect(),
            values,
            warmup: self.warmup_bars(),
        }
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::standard()
    }
}

/// Precomputed indicator values for one bar series.
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    closes: Vec<f64>,
    volumes: Vec<f64>,
    values: IndicatorValues,
    warmup: usize,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn values(&self) -> &IndicatorValues {
        &self.values
    }

    /// Raw snapshot at `index`; fields may be NaN during warmup.
    pub fn raw_snapshot(&self, index: usize) -> Result<IndicatorSnapshot, DataError> {
        if index >= self.len() {
            return Err(DataError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let v = |name: &str| self.values.get(name, index).unwrap_or(f64::NAN);
        Ok(IndicatorSnapshot {
            close: self.closes[index],
            volume: self.volumes[index],
            sma_20: v("sma_20"),
            sma_50: v("sma_50"),
            ema_20: v("ema_20"),
            ema_50: v("ema_50"),
            rsi_14: v("rsi_14"),
            macd_line: v("macd_line"),
            macd_signal: v("macd_signal"),
            macd_histogram: v("macd_histogram"),
            bb_upper: v("bb_upper"),
            bb_middle: v("bb_middle"),
            bb_lower: v("bb_lower"),
            bb_width: v("bb_width"),
            atr_14: v("atr_14"),
            volume_ratio_20: v("volume_ratio_20"),
            momentum_5: v("momentum_5"),
            momentum_10: v("momentum_10"),
            momentum_20: v("momentum_20"),
        })
    }

    /// Fully defined snapshot at `index`, or the reason it is not available yet.
    pub fn snapshot(&self, index: usize) -> Result<IndicatorSnapshot, DataError> {
        if index < self.warmup && index < self.len() {
            return Err(DataError::InsufficientLookback {
                index,
                required: self.warmup,
            });
        }
        let snap = self.raw_snapshot(index)?;
        match snap.first_undefined() {
            Some(name) => Err(DataError::UndefinedIndicator {
                name: name.to_string(),
                index,
            }),
            None => Ok(snap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.2).sin() * 8.0 + i as f64 * 0.05)
            .collect()
    }

    #[test]
    fn warmup_is_longest_lookback() {
        assert_eq!(IndicatorEngine::standard().warmup_bars(), 49);
    }

    #[test]
    fn snapshot_undefined_before_warmup() {
        let series = IndicatorEngine::standard().compute(&make_bars(&wave(80)));
        assert!(matches!(
            series.snapshot(48),
            Err(DataError::InsufficientLookback { index: 48, required: 49 })
        ));
        assert!(series.snapshot(49).is_ok());
        assert!(!series.raw_snapshot(10).unwrap().is_defined());
    }

    #[test]
    fn out_of_range_index() {
        let series = IndicatorEngine::standard().compute(&make_bars(&wave(60)));
        assert!(matches!(
            series.snapshot(60),
            Err(DataError::IndexOutOfRange { index: 60, len: 60 })
        ));
    }

    #[test]
    fn nan_close_surfaces_as_undefined_indicator() {
        let mut bars = make_bars(&wave(80));
        bars[70].close = f64::NAN;
        let series = IndicatorEngine::standard().compute(&bars);
        assert!(matches!(
            series.snapshot(70),
            Err(DataError::UndefinedIndicator { index: 70, .. })
        ));
    }

    #[test]
    fn snapshot_map_has_every_key() {
        let series = IndicatorEngine::standard().compute(&make_bars(&wave(60)));
        let snap = series.snapshot(55).unwrap();
        let map = snap.to_map();
        assert_eq!(map.len(), 19);
        assert_eq!(snap.get("rsi_14"), Some(snap.rsi_14));
        assert_eq!(snap.get("nope"), None);
    }

    #[test]
    fn percent_b_clamped() {
        let mut snap = IndicatorSnapshot::undefined(110.0, 1.0);
        snap.bb_upper = 105.0;
        snap.bb_lower = 95.0;
        assert_eq!(snap.percent_b(), 1.0);
        snap.close = 97.5;
        assert!((snap.percent_b() - 0.25).abs() < 1e-12);
    }
}
