//! TradingSignal: the record that flows through the decision pipeline.
//!
//! Created once by the confluence generator, then adjusted in place by each quant
//! overlay in a fixed order. Stop, target and size stay unset until the overlays and
//! the risk calculator fill them. Once the safety chain sees a signal it is treated as
//! frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bar::Timeframe;
use super::position::PositionSide;
use crate::indicators::IndicatorSnapshot;
use crate::phase::MarketPhase;

/// Directional action carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// Side a new position would take. HOLD never maps to a position.
    pub fn entry_side(&self) -> Option<PositionSide> {
        match self {
            SignalAction::Buy => Some(PositionSide::Long),
            SignalAction::Sell => Some(PositionSide::Short),
            SignalAction::Hold => None,
        }
    }

    /// +1 for BUY, -1 for SELL, 0 for HOLD.
    pub fn sign(&self) -> f64 {
        match self {
            SignalAction::Buy => 1.0,
            SignalAction::Sell => -1.0,
            SignalAction::Hold => 0.0,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// One overlay's effect on a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayAdjustment {
    pub overlay: String,
    pub confidence_before: f64,
    pub confidence_after: f64,
    pub size_multiplier: f64,
    pub note: String,
}

/// Accumulated overlay effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantAdjustments {
    /// Product of every overlay's size multiplier.
    pub size_multiplier: f64,
    pub applied: Vec<OverlayAdjustment>,
    /// Overlay that vetoed the signal, with its reason.
    pub rejected_by: Option<(String, String)>,
}

impl Default for QuantAdjustments {
    fn default() -> Self {
        Self {
            size_multiplier: 1.0,
            applied: Vec::new(),
            rejected_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub action: SignalAction,
    /// Always within [0, 1].
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub position_size: Option<f64>,
    pub market_phase: MarketPhase,
    pub indicator_snapshot: IndicatorSnapshot,
    /// Names of the matched confluence rules, in evaluation order.
    pub reasoning: Vec<String>,
    pub quant_adjustments: QuantAdjustments,
}

impl TradingSignal {
    /// A fresh signal with stop, target and size unset.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: &str,
        timeframe: Timeframe,
        action: SignalAction,
        confidence: f64,
        entry_price: f64,
        market_phase: MarketPhase,
        indicator_snapshot: IndicatorSnapshot,
    ) -> Self {
        let mut signal = Self {
            timestamp,
            symbol: symbol.to_string(),
            timeframe,
            action,
            confidence: 0.0,
            entry_price,
            stop_loss: None,
            take_profit: None,
            position_size: None,
            market_phase,
            indicator_snapshot,
            reasoning: Vec::new(),
            quant_adjustments: QuantAdjustments::default(),
        };
        signal.set_confidence(confidence);
        signal
    }

    /// Set confidence, clamped to [0, 1].
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    /// Record an overlay's adjustment: new confidence plus a size multiplier.
    pub fn apply_adjustment(
        &mut self,
        overlay: &str,
        confidence: f64,
        size_multiplier: f64,
        note: impl Into<String>,
    ) {
        let before = self.confidence;
        self.set_confidence(confidence);
        let multiplier = size_multiplier.max(0.0);
        self.quant_adjustments.size_multiplier *= multiplier;
        self.quant_adjustments.applied.push(OverlayAdjustment {
            overlay: overlay.to_string(),
            confidence_before: before,
            confidence_after: self.confidence,
            size_multiplier: multiplier,
            note: note.into(),
        });
    }

    /// Veto: confidence and size go to zero. The action is left untouched.
    pub fn reject(&mut self, overlay: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.apply_adjustment(overlay, 0.0, 0.0, reason.clone());
        self.quant_adjustments.rejected_by = Some((overlay.to_string(), reason));
    }

    pub fn is_rejected(&self) -> bool {
        self.quant_adjustments.rejected_by.is_some()
    }

    /// A signal the risk calculator may size: non-HOLD, not vetoed, non-zero weight.
    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::Hold
            && !self.is_rejected()
            && self.confidence > 0.0
            && self.quant_adjustments.size_multiplier > 0.0
    }

    /// |entry − stop| once a stop is set.
    pub fn stop_distance(&self) -> Option<f64> {
        self.stop_loss.map(|s| (self.entry_price - s).abs())
    }
}
