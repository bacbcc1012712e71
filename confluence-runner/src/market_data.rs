//! Market data collaborators: ordered bars per (symbol, timeframe).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use confluence_core::domain::{Bar, Timeframe};

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("no {timeframe} data for {symbol}")]
    NotFound { symbol: String, timeframe: Timeframe },
    #[error("reading {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{path} row {row}: {reason}")]
    InvalidBar {
        path: PathBuf,
        row: usize,
        reason: String,
    },
}

pub trait MarketData: Send + Sync {
    /// Every known bar for the pair, oldest first.
    fn history(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, MarketDataError>;

    /// The last `limit` bars with timestamp ≤ `end`.
    fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let mut bars = self.history(symbol, timeframe)?;
        let cut = bars.partition_point(|b| b.timestamp <= end);
        bars.truncate(cut);
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.split_off(skip))
    }
}

// ─── In-memory ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    series: HashMap<(String, Timeframe), Vec<Bar>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a series, sorted by timestamp.
    pub fn insert(&mut self, symbol: &str, timeframe: Timeframe, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.series.insert((symbol.to_string(), timeframe), bars);
    }

    /// Store `bars` and, when the timeframe has a coarser neighbour, its resample.
    pub fn insert_with_higher(&mut self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        if let Some(higher) = timeframe.higher() {
            self.insert(symbol, higher, resample(&bars, higher));
        }
        self.insert(symbol, timeframe, bars);
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.series.keys().map(|(s, _)| s.as_str()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl MarketData for InMemoryMarketData {
    fn history(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, MarketDataError> {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound {
                symbol: symbol.to_string(),
                timeframe,
            })
    }
}

// ─── CSV ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads `<dir>/<SYMBOL>_<tf>.csv` (e.g. `BTCUSDT_1h.csv`) with a
/// `timestamp,open,high,low,close,volume` header and RFC 3339 timestamps.
#[derive(Debug, Clone)]
pub struct CsvMarketData {
    dir: PathBuf,
}

impl CsvMarketData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.dir.join(format!("{symbol}_{timeframe}.csv"))
    }

    fn read(path: &Path) -> Result<Vec<Bar>, MarketDataError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| MarketDataError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let mut bars: Vec<Bar> = Vec::new();
        for (i, row) in reader.deserialize::<CsvBar>().enumerate() {
            let row = row.map_err(|source| MarketDataError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            let bar = Bar::new(row.timestamp, row.open, row.high, row.low, row.close, row.volume);
            let invalid = |reason: &str| MarketDataError::InvalidBar {
                path: path.to_path_buf(),
                row: i + 1,
                reason: reason.to_string(),
            };
            if !bar.is_sane() {
                return Err(invalid("inconsistent OHLCV values"));
            }
            if bars.last().is_some_and(|prev| prev.timestamp >= bar.timestamp) {
                return Err(invalid("timestamps must be strictly increasing"));
            }
            bars.push(bar);
        }
        Ok(bars)
    }
}

impl MarketData for CsvMarketData {
    fn history(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, MarketDataError> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            return Err(MarketDataError::NotFound {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        Self::read(&path)
    }
}

// ─── Resampling ─────────────────────────────────────────────────────

/// Aggregate bars into `timeframe` buckets aligned to the Unix epoch.
///
/// The last bucket may be partial. Void bars are skipped.
pub fn resample(bars: &[Bar], timeframe: Timeframe) -> Vec<Bar> {
    let width = timeframe.duration().num_seconds();
    let mut out: Vec<Bar> = Vec::new();
    for bar in bars.iter().filter(|b| !b.is_void()) {
        let secs = bar.timestamp.timestamp().div_euclid(width) * width;
        let Some(bucket) = DateTime::from_timestamp(secs, 0) else {
            continue;
        };
        match out.last_mut() {
            Some(agg) if agg.timestamp == bucket => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => out.push(Bar::new(bucket, bar.open, bar.high, bar.low, bar.close, bar.volume)),
        }
    }
    out
}
