//! Domain types for the decision pipeline.

pub mod bar;
pub mod daily;
pub mod position;
pub mod signal;
pub mod trade;

pub use bar::{Bar, Timeframe};
pub use daily::DailyRiskState;
pub use position::{Position, PositionSide, PositionStatus};
pub use signal::{OverlayAdjustment, QuantAdjustments, SignalAction, TradingSignal};
pub use trade::{CloseReason, Trade};

/// Symbol type alias
pub type Symbol = String;
