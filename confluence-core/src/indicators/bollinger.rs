//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! Each band is a separate Indicator instance:
//! - Middle: SMA(close, period)
//! - Upper: middle + mult * stddev(close, period)
//! - Lower: middle - mult * stddev(close, period)
//! - Width: (upper - lower) / middle
//!
//! Uses sample stddev (divide by N-1).
//! Lookback: period - 1.

use super::{rolling_mean_std, Indicator};
use crate::domain::Bar;

/// Which output line of the Bollinger Bands to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
    Width,
}

impl BollingerBand {
    fn key(self) -> &'static str {
        match self {
            Self::Upper => "bb_upper",
            Self::Middle => "bb_middle",
            Self::Lower => "bb_lower",
            Self::Width => "bb_width",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    band: BollingerBand,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64, band: BollingerBand) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self {
            period,
            multiplier,
            band,
        }
    }
}

/// Upper, middle and lower bands in one pass.
pub fn bands(closes: &[f64], period: usize, multiplier: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let (middle, std) = rolling_mean_std(closes, period);
    let upper = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| m + multiplier * s)
        .collect();
    let lower = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| m - multiplier * s)
        .collect();
    (upper, middle, lower)
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        self.band.key()
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let (upper, middle, lower) = bands(&closes, self.period, self.multiplier);
        match self.band {
            BollingerBand::Upper => upper,
            BollingerBand::Middle => middle,
            BollingerBand::Lower => lower,
            BollingerBand::Width => upper
                .iter()
                .zip(&lower)
                .zip(&middle)
                .map(|((u, l), m)| if *m == 0.0 { f64::NAN } else { (u - l) / m })
                .collect(),
        }
    }
}
