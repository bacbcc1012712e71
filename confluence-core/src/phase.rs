//! Market phase classification.
//!
//! An ordered list of (phase, predicate) rules, first match wins. The predicates
//! overlap; the order is the policy and is pinned by tests.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    Transition,
    Unknown,
}

impl MarketPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accumulation => "ACCUMULATION",
            Self::Markup => "MARKUP",
            Self::Distribution => "DISTRIBUTION",
            Self::Markdown => "MARKDOWN",
            Self::Transition => "TRANSITION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the ordered classification table.
#[derive(Clone, Copy)]
pub struct PhaseRule {
    pub phase: MarketPhase,
    pub name: &'static str,
    pub predicate: fn(&IndicatorSnapshot) -> bool,
}

fn accumulation(s: &IndicatorSnapshot) -> bool {
    s.volume_ratio_20 > 1.2 && s.close < s.sma_20 && s.rsi_14 < 40.0
}

fn markup(s: &IndicatorSnapshot) -> bool {
    s.momentum_10 > 0.15 && s.close > s.sma_20 && s.close > s.sma_50 && s.sma_20 > s.sma_50
}

fn distribution(s: &IndicatorSnapshot) -> bool {
    s.rsi_14 > 75.0 && s.bb_width > 0.05 && s.volume_ratio_20 > 1.5
}

fn markdown(s: &IndicatorSnapshot) -> bool {
    s.momentum_10 < -0.10 && s.close < s.sma_20
}

/// Evaluated top to bottom. Do not reorder.
pub const PHASE_RULES: [PhaseRule; 4] = [
    PhaseRule {
        phase: MarketPhase::Accumulation,
        name: "accumulation",
        predicate: accumulation,
    },
    PhaseRule {
        phase: MarketPhase::Markup,
        name: "markup",
        predicate: markup,
    },
    PhaseRule {
        phase: MarketPhase::Distribution,
        name: "distribution",
        predicate: distribution,
    },
    PhaseRule {
        phase: MarketPhase::Markdown,
        name: "markdown",
        predicate: markdown,
    },
];

/// Classify a snapshot. Undefined snapshots are `Unknown`; no match is `Transition`.
pub fn classify(snapshot: &IndicatorSnapshot) -> MarketPhase {
    if !snapshot.is_defined() {
        return MarketPhase::Unknown;
    }
    PHASE_RULES
        .iter()
        .find(|rule| (rule.predicate)(snapshot))
        .map(|rule| rule.phase)
        .unwrap_or(MarketPhase::Transition)
}
