//! Integration tests for the paper-trading scan.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use confluence_core::domain::Timeframe;
use confluence_runner::{
    synthetic_market, Decision, InMemoryLedger, Ledger, LedgerRecord, MarketData, PaperTrader,
    PipelineConfig,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn config(dir: &std::path::Path, symbols: &[&str]) -> PipelineConfig {
    let list = symbols
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let text = format!(
        r#"
symbols = [{list}]
timeframe = "h1"

[scheduling]
history_bars = 200

[safety]
max_daily_loss_percent = 5.0
max_position_size = 1500.0
max_portfolio_risk = 0.02
require_confirmation = false
emergency_stop_file = "{}"
emergency_stop_env = "CONFLUENCE_PAPER_TEST_STOP"
fixed_risk_fraction = 0.01
"#,
        dir.join("EMERGENCY_STOP").display()
    );
    PipelineConfig::from_toml_str(&text).unwrap()
}

fn run_ticks(trader: &PaperTrader, from: usize, to: usize) -> Vec<Vec<(String, Decision)>> {
    (from..to)
        .map(|i| {
            let now = t0() + Duration::hours(i as i64);
            trader.scan_tick(now).unwrap().decisions
        })
        .collect()
}

// ── 1. Scan shape ──

#[test]
fn one_decision_per_symbol_in_configured_order() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = ["SOLUSDT", "BTCUSDT", "ETHUSDT"];
    let data = Arc::new(synthetic_market(&symbols, Timeframe::H1, t0(), 400));
    let trader = PaperTrader::new(
        config(dir.path(), &symbols),
        data,
        Box::new(InMemoryLedger::new()),
        t0(),
    )
    .unwrap();

    for decisions in run_ticks(&trader, 60, 120) {
        let order: Vec<&str> = decisions.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, symbols);
    }
}

#[test]
fn early_ticks_have_no_signal() {
    let dir = tempfile::tempdir().unwrap();
    let data = Arc::new(synthetic_market(&["BTCUSDT"], Timeframe::H1, t0(), 400));
    let trader = PaperTrader::new(
        config(dir.path(), &["BTCUSDT"]),
        data,
        Box::new(InMemoryLedger::new()),
        t0(),
    )
    .unwrap();
    let report = trader.scan_tick(t0() + Duration::hours(10)).unwrap();
    assert!(matches!(report.decisions[0].1, Decision::NoSignal(_)));
    assert_eq!(report.equity, 10_000.0);
}

#[test]
fn unknown_symbol_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let data = Arc::new(synthetic_market(&["BTCUSDT"], Timeframe::H1, t0(), 400));
    let trader = PaperTrader::new(
        config(dir.path(), &["BTCUSDT", "DOGEUSDT"]),
        data,
        Box::new(InMemoryLedger::new()),
        t0(),
    )
    .unwrap();
    let report = trader.scan_tick(t0() + Duration::hours(100)).unwrap();
    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.fetch_errors.len(), 1);
    assert_eq!(report.fetch_errors[0].0, "DOGEUSDT");
}

// ── 2. Shared state ──

#[test]
fn state_handle_sees_committed_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = ["BTCUSDT", "ETHUSDT"];
    let data = Arc::new(synthetic_market(&symbols, Timeframe::H1, t0(), 600));
    let trader = PaperTrader::new(
        config(dir.path(), &symbols),
        data,
        Box::new(InMemoryLedger::new()),
        t0(),
    )
    .unwrap();

    let ticks = run_ticks(&trader, 60, 560);
    let opened = ticks
        .iter()
        .flatten()
        .filter(|(_, d)| matches!(d, Decision::Opened(_)))
        .count();

    let state = trader.state();
    let state = state.lock();
    let records = state.ledger.records().unwrap();
    let opens = records
        .iter()
        .filter(|r| matches!(r, LedgerRecord::PositionOpened(_)))
        .count();
    assert_eq!(opens, opened);
    assert!(state.simulator.portfolio().open_count() <= symbols.len());
    let trades = records
        .iter()
        .filter(|r| matches!(r, LedgerRecord::Trade(_)))
        .count();
    assert_eq!(trades, state.simulator.trades().len());
}

#[test]
fn close_all_flattens_the_book() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = ["BTCUSDT", "ETHUSDT"];
    let data = Arc::new(synthetic_market(&symbols, Timeframe::H1, t0(), 600));
    let trader = PaperTrader::new(
        config(dir.path(), &symbols),
        data,
        Box::new(InMemoryLedger::new()),
        t0(),
    )
    .unwrap();
    run_ticks(&trader, 60, 560);
    trader.close_all(t0() + Duration::hours(560)).unwrap();
    let state = trader.state();
    let state = state.lock();
    assert_eq!(state.simulator.portfolio().open_count(), 0);
    let pnl: f64 = state.simulator.trades().iter().map(|t| t.realized_pnl).sum();
    assert!((state.simulator.cash() - (10_000.0 + pnl)).abs() < 1e-6);
}

#[test]
fn scans_between_bar_opens_still_trade() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = ["BTCUSDT", "ETHUSDT"];
    let data = Arc::new(synthetic_market(&symbols, Timeframe::H1, t0(), 600));
    let trader = |data: Arc<dyn MarketData>| {
        PaperTrader::new(
            config(dir.path(), &symbols),
            data,
            Box::new(InMemoryLedger::new()),
            t0(),
        )
        .unwrap()
    };
    let on_the_hour = trader(data.clone());
    let offset = trader(data);

    let mut opened = (0, 0);
    for i in 60..560 {
        let hour = t0() + Duration::hours(i);
        for (_, d) in on_the_hour.scan_tick(hour).unwrap().decisions {
            if matches!(d, Decision::Opened(_)) {
                opened.0 += 1;
            }
        }
        let now = hour + Duration::minutes(10);
        for (_, d) in offset.scan_tick(now).unwrap().decisions {
            match d {
                Decision::Opened(position) => {
                    assert_eq!(position.entry_time, now);
                    opened.1 += 1;
                }
                Decision::Vetoed { reason, .. } => assert!(!reason.contains("expired"), "{reason}"),
                _ => {}
            }
        }
    }
    assert!(opened.1 > 0);
    assert_eq!(opened.0, opened.1);
}

// ── 3. Determinism under parallel fetch ──

#[test]
fn parallel_scans_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT"];
    let data = Arc::new(synthetic_market(&symbols, Timeframe::H1, t0(), 400));
    let make = || {
        PaperTrader::new(
            config(dir.path(), &symbols),
            data.clone(),
            Box::new(InMemoryLedger::new()),
            t0(),
        )
        .unwrap()
    };
    let a = run_ticks(&make(), 60, 380);
    let b = run_ticks(&make(), 60, 380);
    assert_eq!(a, b);
}
