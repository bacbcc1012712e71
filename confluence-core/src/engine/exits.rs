//! Exogenous exit triggers: stop loss, take profit, and max hold time.
//!
//! Fills are gap-aware. A bar that opens beyond the stop fills at the open, and a bar
//! that opens beyond the target fills at the open. When a bar's range touches both
//! levels without a gap, `ExitPriority` breaks the tie.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, CloseReason, Position, PositionSide};

/// Which level fills first when one bar touches both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPriority {
    #[default]
    StopLossFirst,
    TakeProfitFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExitRules {
    pub priority: ExitPriority,
    pub max_hold: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitFill {
    pub reason: CloseReason,
    pub price: f64,
}

/// The exit `bar` triggers for `position`, if any.
///
/// Bars at or before the entry time never trigger: the entry bar's own range was
/// already known when the position opened.
pub fn exit_trigger(position: &Position, bar: &Bar, rules: &ExitRules) -> Option<ExitFill> {
    if bar.timestamp <= position.entry_time || bar.is_void() {
        return None;
    }

    let (stop, target) = (position.stop_loss, position.take_profit);
    // Normalize to "long" orientation: adverse moves are downward.
    let (stop_gapped, target_gapped, stop_hit, target_hit) = match position.side {
        PositionSide::Long => (
            bar.open <= stop,
            bar.open >= target,
            bar.low <= stop,
            bar.high >= target,
        ),
        PositionSide::Short => (
            bar.open >= stop,
            bar.open <= target,
            bar.high >= stop,
            bar.low <= target,
        ),
    };

    let stop_fill = ExitFill {
        reason: CloseReason::StopLoss,
        price: if stop_gapped { bar.open } else { stop },
    };
    let target_fill = ExitFill {
        reason: CloseReason::TakeProfit,
        price: if target_gapped { bar.open } else { target },
    };

    if stop_gapped {
        return Some(stop_fill);
    }
    if target_gapped {
        return Some(target_fill);
    }
    match (stop_hit, target_hit) {
        (true, true) => Some(match rules.priority {
            ExitPriority::StopLossFirst => stop_fill,
            ExitPriority::TakeProfitFirst => target_fill,
        }),
        (true, false) => Some(stop_fill),
        (false, true) => Some(target_fill),
        (false, false) => rules
            .max_hold
            .filter(|max| bar.timestamp - position.entry_time >= *max)
            .map(|_| ExitFill {
                reason: CloseReason::TimeLimit,
                price: bar.close,
            }),
    }
}
