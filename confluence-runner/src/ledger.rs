//! Ledger: append-only persistence for signals, positions, trades and daily state.
//!
//! A batch is the unit of persistence: the pipeline writes every record produced by
//! one decision in a single `append` and only commits in-memory state once it
//! succeeds.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use confluence_core::domain::{DailyRiskState, Position, Trade, TradingSignal};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("serializing ledger record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("injected write failure")]
    Injected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Signal(TradingSignal),
    PositionOpened(Position),
    Trade(Trade),
    Daily(DailyRiskState),
}

impl LedgerRecord {
    /// Stable name of the record kind; also the JSONL file stem.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signal",
            Self::PositionOpened(_) => "position_opened",
            Self::Trade(_) => "trade",
            Self::Daily(_) => "daily",
        }
    }
}

pub trait Ledger: Send {
    /// Persist a batch. On error nothing from the batch may be assumed durable.
    fn append(&mut self, records: &[LedgerRecord]) -> Result<(), LedgerError>;

    fn records(&self) -> Result<Vec<LedgerRecord>, LedgerError>;

    /// Most recent daily risk state, for resuming a session.
    fn latest_daily(&self) -> Result<Option<DailyRiskState>, LedgerError> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|r| match r {
                LedgerRecord::Daily(d) => Some(d),
                _ => None,
            })
            .last())
    }
}

// ─── In-memory ──────────────────────────────────────────────────────

/// Ledger kept in a `Vec`. `fail_writes` makes every append fail, for exercising
/// the pipeline's rollback path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    records: Vec<LedgerRecord>,
    fail_writes: bool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            fail_writes: true,
        }
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Ledger for InMemoryLedger {
    fn append(&mut self, records: &[LedgerRecord]) -> Result<(), LedgerError> {
        if self.fail_writes {
            return Err(LedgerError::Injected);
        }
        self.records.extend_from_slice(records);
        Ok(())
    }

    fn records(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        Ok(self.records.clone())
    }
}

// ─── JSONL ──────────────────────────────────────────────────────────

const KINDS: [&str; 4] = ["signal", "position_opened", "trade", "daily"];

/// One `<kind>.jsonl` file per record kind under a directory.
///
/// The whole batch is serialized before any file is touched, so a serialization
/// failure writes nothing. An I/O failure midway can leave earlier kinds written.
#[derive(Debug, Clone)]
pub struct JsonlLedger {
    dir: PathBuf,
}

impl JsonlLedger {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{kind}.jsonl"))
    }

    fn read_kind(&self, kind: &str) -> Result<Vec<LedgerRecord>, LedgerError> {
        let path = self.path_for(kind);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        let mut out = Vec::new();
        for (lineno, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRecord>(&line) {
                Ok(record) => out.push(record),
                Err(e) => warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed ledger line"),
            }
        }
        Ok(out)
    }
}

impl Ledger for JsonlLedger {
    fn append(&mut self, records: &[LedgerRecord]) -> Result<(), LedgerError> {
        let mut batches: BTreeMap<&'static str, String> = BTreeMap::new();
        for record in records {
            let line = serde_json::to_string(record)?;
            let buf = batches.entry(record.kind()).or_default();
            buf.push_str(&line);
            buf.push('\n');
        }
        for (kind, lines) in batches {
            let path = self.path_for(kind);
            let io_err = |source| LedgerError::Io {
                path: path.clone(),
                source,
            };
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err)?;
            file.write_all(lines.as_bytes()).map_err(io_err)?;
            file.flush().map_err(io_err)?;
        }
        Ok(())
    }

    /// Every record, grouped by kind in a fixed order, file order within a kind.
    fn records(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut out = Vec::new();
        for kind in KINDS {
            out.extend(self.read_kind(kind)?);
        }
        Ok(out)
    }

    fn latest_daily(&self) -> Result<Option<DailyRiskState>, LedgerError> {
        Ok(self
            .read_kind("daily")?
            .into_iter()
            .filter_map(|r| match r {
                LedgerRecord::Daily(d) => Some(d),
                _ => None,
            })
            .last())
    }
}
