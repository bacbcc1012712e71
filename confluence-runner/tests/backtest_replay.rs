//! Integration tests for backtest replay: CSV data in, JSONL ledger out.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

use confluence_core::domain::{Bar, CloseReason, Timeframe};
use confluence_runner::{
    resample, run_backtest, synthetic_bars, synthetic_market, CsvMarketData, InMemoryLedger,
    JsonlLedger, Ledger, LedgerRecord, PipelineConfig, RunError,
};

const SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn config(dir: &Path) -> PipelineConfig {
    let text = format!(
        r#"
symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
timeframe = "h1"

[safety]
max_daily_loss_percent = 5.0
max_position_size = 2000.0
max_portfolio_risk = 0.02
require_confirmation = false
emergency_stop_file = "{}"
emergency_stop_env = "CONFLUENCE_REPLAY_TEST_STOP"
fixed_risk_fraction = 0.01
"#,
        dir.join("EMERGENCY_STOP").display()
    );
    PipelineConfig::from_toml_str(&text).unwrap()
}

fn write_csv(path: &Path, bars: &[Bar]) {
    let mut f = std::fs::File::create(path).unwrap();
    writeln!(f, "timestamp,open,high,low,close,volume").unwrap();
    for b in bars {
        writeln!(
            f,
            "{},{},{},{},{},{}",
            b.timestamp.to_rfc3339(),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        )
        .unwrap();
    }
}

fn csv_market(dir: &Path, count: usize) -> CsvMarketData {
    let md = CsvMarketData::new(dir);
    for symbol in SYMBOLS {
        let bars = synthetic_bars(symbol, Timeframe::H1, t0(), count);
        write_csv(&md.path_for(symbol, Timeframe::H4), &resample(&bars, Timeframe::H4));
        write_csv(&md.path_for(symbol, Timeframe::H1), &bars);
    }
    md
}

// ── 1. Ledger contents ──

#[test]
fn jsonl_ledger_mirrors_the_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let data = csv_market(dir.path(), 900);
    let ledger_dir = dir.path().join("ledger");
    let ledger = JsonlLedger::open(&ledger_dir).unwrap();

    let result = run_backtest(&config(dir.path()), &data, Box::new(ledger)).unwrap();
    assert_eq!(result.bar_count, 900);
    assert_eq!(result.decisions.values().sum::<usize>(), 900 * SYMBOLS.len());

    let records = JsonlLedger::open(&ledger_dir).unwrap().records().unwrap();
    let count = |kind: &str| records.iter().filter(|r| r.kind() == kind).count();
    assert_eq!(count("trade"), result.trades.len());
    assert_eq!(
        count("position_opened"),
        result.decisions.get("opened").copied().unwrap_or(0)
    );
    assert!(count("daily") >= 1);

    // every opened position is eventually closed
    assert_eq!(count("position_opened"), count("trade"));
    for record in &records {
        if let LedgerRecord::Trade(t) = record {
            assert!(t.exit_time >= t.entry_time);
            assert!(t.size > 0.0);
        }
    }
}

// ── 2. Accounting ──

#[test]
fn cash_reconciles_with_realized_pnl() {
    let dir = tempfile::tempdir().unwrap();
    let data = synthetic_market(&SYMBOLS, Timeframe::H1, t0(), 900);
    let result = run_backtest(&config(dir.path()), &data, Box::new(InMemoryLedger::new())).unwrap();

    let pnl: f64 = result.trades.iter().map(|t| t.realized_pnl).sum();
    assert!((result.final_cash - (10_000.0 + pnl)).abs() < 1e-6);
    assert!((result.report.total_pnl - pnl).abs() < 1e-9);
    assert!(result.max_drawdown_pct <= 0.0);
    assert!(result.equity_curve.iter().all(|p| p.equity <= p.peak + 1e-9));
    // positions never overlap on one symbol
    for symbol in SYMBOLS {
        let mut trades: Vec<_> = result.trades.iter().filter(|t| t.symbol == symbol).collect();
        trades.sort_by_key(|t| t.entry_time);
        for pair in trades.windows(2) {
            assert!(pair[1].entry_time >= pair[0].exit_time);
        }
    }
    let closed_at_end = result
        .trades
        .iter()
        .filter(|t| t.close_reason == CloseReason::SessionClose)
        .count();
    assert!(closed_at_end <= SYMBOLS.len());
}

// ── 3. Determinism ──

#[test]
fn replay_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let data = synthetic_market(&SYMBOLS, Timeframe::H1, t0(), 600);
    let cfg = config(dir.path());
    let a = run_backtest(&cfg, &data, Box::new(InMemoryLedger::new())).unwrap();
    let b = run_backtest(&cfg, &data, Box::new(InMemoryLedger::new())).unwrap();
    assert_eq!(a.run_id, b.run_id);
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.decisions, b.decisions);
    assert_eq!(a.report, b.report);
}

// ── 4. Safety ──

#[test]
fn emergency_stop_blocks_the_whole_replay() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("EMERGENCY_STOP"), "halt").unwrap();
    let data = synthetic_market(&SYMBOLS, Timeframe::H1, t0(), 600);
    let result = run_backtest(&config(dir.path()), &data, Box::new(InMemoryLedger::new())).unwrap();
    assert!(result.trades.is_empty());
    assert_eq!(result.final_cash, 10_000.0);
    assert_eq!(result.decisions.get("opened"), None);
}

#[test]
fn failing_ledger_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let data = synthetic_market(&SYMBOLS, Timeframe::H1, t0(), 900);
    // the first day rollover already needs a ledger write
    let err = run_backtest(&config(dir.path()), &data, Box::new(InMemoryLedger::failing()));
    assert!(matches!(err, Err(RunError::Pipeline(_))));
}

// ── 5. Pure-risk toggle ──

#[test]
fn pure_risk_entries_stay_within_the_risk_budget() {
    let dir = tempfile::tempdir().unwrap();
    let data = synthetic_market(&SYMBOLS, Timeframe::H1, t0(), 900);
    let mut cfg = config(dir.path());
    cfg.risk.pure_risk = true;
    cfg.safety.max_position_size = 1_000_000.0;
    cfg.simulator.initial_capital = 1_000_000.0;
    let result = run_backtest(&cfg, &data, Box::new(InMemoryLedger::new())).unwrap();
    // cash at any entry is at most capital plus every realized win
    let wins: f64 = result
        .trades
        .iter()
        .map(|t| t.realized_pnl.max(0.0))
        .sum();
    let ceiling = 0.01 * (1_000_000.0 + wins) + 1e-6;
    for trade in &result.trades {
        assert!(trade.initial_risk > 0.0);
        assert!(trade.initial_risk <= ceiling);
    }
}
