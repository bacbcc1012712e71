//! MACD: difference of a fast and a slow EMA, its EMA signal line and the histogram.
//!
//! line = EMA(fast) - EMA(slow), valid from index slow-1
//! signal = EMA(signal) of line, valid from index slow+signal-2
//! histogram = line - signal

use super::ema::ema_of_series;
use super::Indicator;
use crate::domain::Bar;

/// Which MACD output to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdLine {
    Line,
    Signal,
    Histogram,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    line: MacdLine,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, line: MacdLine) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(fast < slow, "MACD fast period must be below slow period");
        Self {
            fast,
            slow,
            signal,
            line,
        }
    }

    /// The conventional 12/26/9 configuration.
    pub fn standard(line: MacdLine) -> Self {
        Self::new(12, 26, 9, line)
    }
}

/// All three MACD series at once.
pub fn macd_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = ema_of_series(closes, fast);
    let slow_ema = ema_of_series(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema_of_series(&line, signal);
    let histogram = line.iter().zip(&signal_line).map(|(l, s)| l - s).collect();
    (line, signal_line, histogram)
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        match self.line {
            MacdLine::Line => "macd_line",
            MacdLine::Signal => "macd_signal",
            MacdLine::Histogram => "macd_histogram",
        }
    }

    fn lookback(&self) -> usize {
        match self.line {
            MacdLine::Line => self.slow - 1,
            MacdLine::Signal | MacdLine::Histogram => self.slow + self.signal - 2,
        }
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let (line, signal, histogram) = macd_series(&closes, self.fast, self.slow, self.signal);
        match self.line {
            MacdLine::Line => line,
            MacdLine::Signal => signal,
            MacdLine::Histogram => histogram,
        }
    }
}
