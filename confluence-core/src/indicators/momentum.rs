//! Momentum as fractional price change.
//!
//! momentum[t] = close[t] / close[t-period] - 1
//! Lookback: period.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Momentum {
    period: usize,
    name: String,
}

impl Momentum {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "Momentum period must be >= 1");
        Self {
            period,
            name: format!("momentum_{period}"),
        }
    }
}

impl Indicator for Momentum {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let mut result = vec![f64::NAN; n];

        for i in self.period..n {
            let prev = bars[i - self.period].close;
            let curr = bars[i].close;
            if prev.is_nan() || curr.is_nan() || prev == 0.0 {
                continue;
            }
            result[i] = curr / prev - 1.0;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn momentum_is_percent_change() {
        let bars = make_bars(&[100.0, 110.0, 105.0, 115.5]);
        let result = Momentum::new(2).compute(&bars);
        assert!(result[1].is_nan());
        assert_approx(result[2], 0.05, DEFAULT_EPSILON);
        assert_approx(result[3], 0.05, DEFAULT_EPSILON);
    }

    #[test]
    fn momentum_negative() {
        let result = Momentum::new(1).compute(&make_bars(&[100.0, 90.0]));
        assert_approx(result[1], -0.10, DEFAULT_EPSILON);
    }
}
