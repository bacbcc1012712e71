//! Backtest / paper-trading simulator.
//!
//! A per-symbol state machine `NO_POSITION → OPEN → CLOSED`. Opening and closing are
//! split into a pure `plan_*` step and a `commit_*` step, so a caller can persist the
//! planned record before any state changes.

pub mod exits;
pub mod simulator;

pub use exits::{exit_trigger, ExitFill, ExitPriority, ExitRules};
pub use simulator::{EquityPoint, SignalRoute, Simulator, SimulatorConfig, SimulatorError};
