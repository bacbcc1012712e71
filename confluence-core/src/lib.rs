//! Confluence Core: the decision pipeline for crypto trading signals.
//!
//! This crate contains everything between a bar sequence and a closed trade:
//! - Domain types (bars, signals, positions, trades, daily risk state)
//! - Technical indicators and the market phase classifier
//! - The confluence-weighted signal generator
//! - Quant overlays (volatility, correlation/heat, signal quality, mean reversion)
//! - Fixed-fractional risk sizing with a pure-risk toggle
//! - The safety guard chain
//! - Portfolio state and the backtest / paper-trading simulator
//!
//! Everything here is synchronous and free of I/O apart from the emergency-stop
//! sentinel probe. Scheduling, persistence and market data live in the runner.

pub mod domain;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod overlays;
pub mod phase;
pub mod portfolio;
pub mod safety;
pub mod signals;
pub mod sizers;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ConfigError, DataError};
