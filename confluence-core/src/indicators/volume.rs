//! Volume ratio: current volume over its rolling average.
//!
//! ratio[t] = volume[t] / SMA(volume, period)[t]
//! Lookback: period - 1. Undefined when the average volume is zero.

use super::sma::sma_of_series;
use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct VolumeRatio {
    period: usize,
    name: String,
}

impl VolumeRatio {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "volume ratio period must be >= 1");
        Self {
            period,
            name: format!("volume_ratio_{period}"),
        }
    }
}

impl Indicator for VolumeRatio {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let avg = sma_of_series(&volumes, self.period);
        volumes
            .iter()
            .zip(&avg)
            .map(|(&v, &a)| if a.is_nan() || a == 0.0 { f64::NAN } else { v / a })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn spike_doubles_ratio() {
        let mut bars = make_bars(&[100.0; 4]);
        bars[3].volume = 2500.0;
        // avg of (1000, 1000, 2500) = 1500
        let result = VolumeRatio::new(3).compute(&bars);
        assert!(result[1].is_nan());
        assert_approx(result[2], 1.0, DEFAULT_EPSILON);
        assert_approx(result[3], 2500.0 / 1500.0, DEFAULT_EPSILON);
    }

    #[test]
    fn zero_volume_is_undefined() {
        let mut bars = make_bars(&[100.0; 3]);
        for b in &mut bars {
            b.volume = 0.0;
        }
        assert!(VolumeRatio::new(2).compute(&bars)[2].is_nan());
    }
}
