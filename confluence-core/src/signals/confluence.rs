//! Confluence signal generator.
//!
//! Two weighted rule lists (BUY and SELL) are evaluated against the current and
//! previous bar's indicators. Each side's strength is the sum of its matched weights.
//! A side wins only when it is strictly stronger than the other and reaches
//! `min_confidence`; anything else, ties included, is HOLD.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Bar, SignalAction, Timeframe, TradingSignal};
use crate::error::{require_unit, ConfigError, DataError};
use crate::indicators::{IndicatorSeries, IndicatorSnapshot};
use crate::phase::{classify, MarketPhase};

/// Per-condition weights, shared by the BUY rules and their SELL mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceWeights {
    pub phase_extreme: f64,
    pub macd_cross: f64,
    pub band_touch: f64,
    pub volume: f64,
    pub momentum: f64,
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        Self {
            phase_extreme: 0.30,
            macd_cross: 0.25,
            band_touch: 0.20,
            volume: 0.15,
            momentum: 0.10,
        }
    }
}

impl ConfluenceWeights {
    pub fn total(&self) -> f64 {
        self.phase_extreme + self.macd_cross + self.band_touch + self.volume + self.momentum
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_unit("weights.phase_extreme", self.phase_extreme)?;
        require_unit("weights.macd_cross", self.macd_cross)?;
        require_unit("weights.band_touch", self.band_touch)?;
        require_unit("weights.volume", self.volume)?;
        require_unit("weights.momentum", self.momentum)?;
        if self.total() > 1.0 + 1e-9 {
            return Err(ConfigError::invalid(
                "weights",
                format!("must sum to at most 1.0, got {:.4}", self.total()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub weights: ConfluenceWeights,
    pub min_confidence: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_threshold: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            weights: ConfluenceWeights::default(),
            min_confidence: 0.6,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_threshold: 1.2,
        }
    }
}

impl ConfluenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        require_unit("min_confidence", self.min_confidence)?;
        if !(self.rsi_oversold < self.rsi_overbought) {
            return Err(ConfigError::invalid(
                "rsi_oversold",
                "must be below rsi_overbought",
            ));
        }
        Ok(())
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub current: &'a IndicatorSnapshot,
    pub previous: &'a IndicatorSnapshot,
    pub phase: MarketPhase,
    pub config: &'a ConfluenceConfig,
}

/// One weighted condition.
#[derive(Clone, Copy)]
pub struct ConfluenceRule {
    pub name: &'static str,
    pub weight: fn(&ConfluenceWeights) -> f64,
    pub test: fn(&RuleInput) -> bool,
}

// ─── BUY rules ───────────────────────────────────────────────────────

fn accumulation_oversold(i: &RuleInput) -> bool {
    i.phase == MarketPhase::Accumulation && i.current.rsi_14 < i.config.rsi_oversold
}

fn macd_bullish_cross(i: &RuleInput) -> bool {
    i.previous.macd_line <= i.previous.macd_signal && i.current.macd_line > i.current.macd_signal
}

fn lower_band_bounce(i: &RuleInput) -> bool {
    i.previous.close <= i.previous.bb_lower && i.current.close > i.current.bb_lower
}

fn volume_confirmation(i: &RuleInput) -> bool {
    i.current.volume_ratio_20 > i.config.volume_threshold
}

fn momentum_turning_positive(i: &RuleInput) -> bool {
    i.previous.momentum_5 <= 0.0 && i.current.momentum_5 > 0.0
}

// ─── SELL rules ──────────────────────────────────────────────────────

fn distribution_overbought(i: &RuleInput) -> bool {
    i.phase == MarketPhase::Distribution && i.current.rsi_14 > i.config.rsi_overbought
}

fn macd_bearish_cross(i: &RuleInput) -> bool {
    i.previous.macd_line >= i.previous.macd_signal && i.current.macd_line < i.current.macd_signal
}

fn upper_band_rejection(i: &RuleInput) -> bool {
    i.previous.close >= i.previous.bb_upper && i.current.close < i.current.bb_upper
}

fn volume_spike_distribution(i: &RuleInput) -> bool {
    i.current.volume_ratio_20 > i.config.volume_threshold
        && matches!(i.phase, MarketPhase::Distribution | MarketPhase::Markdown)
}

fn momentum_accelerating_down(i: &RuleInput) -> bool {
    i.current.momentum_5 < 0.0 && i.current.momentum_5 < i.previous.momentum_5
}

pub const BUY_RULES: [ConfluenceRule; 5] = [
    ConfluenceRule {
        name: "accumulation_oversold",
        weight: |w| w.phase_extreme,
        test: accumulation_oversold,
    },
    ConfluenceRule {
        name: "macd_bullish_cross",
        weight: |w| w.macd_cross,
        test: macd_bullish_cross,
    },
    ConfluenceRule {
        name: "lower_band_bounce",
        weight: |w| w.band_touch,
        test: lower_band_bounce,
    },
    ConfluenceRule {
        name: "volume_confirmation",
        weight: |w| w.volume,
        test: volume_confirmation,
    },
    ConfluenceRule {
        name: "momentum_turning_positive",
        weight: |w| w.momentum,
        test: momentum_turning_positive,
    },
];

pub const SELL_RULES: [ConfluenceRule; 5] = [
    ConfluenceRule {
        name: "distribution_overbought",
        weight: |w| w.phase_extreme,
        test: distribution_overbought,
    },
    ConfluenceRule {
        name: "macd_bearish_cross",
        weight: |w| w.macd_cross,
        test: macd_bearish_cross,
    },
    ConfluenceRule {
        name: "upper_band_rejection",
        weight: |w| w.band_touch,
        test: upper_band_rejection,
    },
    ConfluenceRule {
        name: "volume_spike_distribution",
        weight: |w| w.volume,
        test: volume_spike_distribution,
    },
    ConfluenceRule {
        name: "momentum_accelerating_down",
        weight: |w| w.momentum,
        test: momentum_accelerating_down,
    },
];

/// Outcome of evaluating both rule lists on one bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Confluence {
    pub buy_strength: f64,
    pub sell_strength: f64,
    pub buy_matched: Vec<&'static str>,
    pub sell_matched: Vec<&'static str>,
}

impl Confluence {
    /// Resolve to an action and its confidence.
    pub fn decide(&self, min_confidence: f64) -> (SignalAction, f64) {
        let (buy, sell) = (self.buy_strength, self.sell_strength);
        if buy > sell && buy >= min_confidence {
            (SignalAction::Buy, buy)
        } else if sell > buy && sell >= min_confidence {
            (SignalAction::Sell, sell)
        } else {
            (SignalAction::Hold, buy.max(sell))
        }
    }
}

fn score(rules: &[ConfluenceRule], input: &RuleInput) -> (f64, Vec<&'static str>) {
    let mut strength = 0.0;
    let mut matched = Vec::new();
    for rule in rules {
        if (rule.test)(input) {
            strength += (rule.weight)(&input.config.weights);
            matched.push(rule.name);
        }
    }
    (strength, matched)
}

#[derive(Debug, Clone, Default)]
pub struct ConfluenceGenerator {
    config: ConfluenceConfig,
}

impl ConfluenceGenerator {
    pub fn new(config: ConfluenceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    /// Score both sides for a pair of defined snapshots.
    pub fn evaluate(
        &self,
        current: &IndicatorSnapshot,
        previous: &IndicatorSnapshot,
        phase: MarketPhase,
    ) -> Confluence {
        let input = RuleInput {
            current,
            previous,
            phase,
            config: &self.config,
        };
        let (buy_strength, buy_matched) = score(&BUY_RULES, &input);
        let (sell_strength, sell_matched) = score(&SELL_RULES, &input);
        Confluence {
            buy_strength,
            sell_strength,
            buy_matched,
            sell_matched,
        }
    }

    /// Build the raw signal for bar `index`.
    ///
    /// Errors with `DataError` when `index` is 0 or either this bar's or the
    /// previous bar's indicators are not yet defined.
    pub fn generate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        series: &IndicatorSeries,
        index: usize,
    ) -> Result<TradingSignal, DataError> {
        if index == 0 {
            return Err(DataError::InsufficientLookback { index, required: 1 });
        }
        let bar = bars.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: bars.len(),
        })?;
        let current = series.snapshot(index)?;
        let previous = series.snapshot(index - 1)?;
        let phase = classify(&current);

        let confluence = self.evaluate(&current, &previous, phase);
        let (action, confidence) = confluence.decide(self.config.min_confidence);
        let reasoning: Vec<String> = match action {
            SignalAction::Buy => confluence.buy_matched.iter().map(|s| s.to_string()).collect(),
            SignalAction::Sell => confluence.sell_matched.iter().map(|s| s.to_string()).collect(),
            SignalAction::Hold => confluence
                .buy_matched
                .iter()
                .chain(&confluence.sell_matched)
                .map(|s| s.to_string())
                .collect(),
        };

        debug!(
            symbol,
            %phase,
            %action,
            buy = confluence.buy_strength,
            sell = confluence.sell_strength,
            "confluence evaluated"
        );

        let mut signal = TradingSignal::new(
            bar.timestamp,
            symbol,
            timeframe,
            action,
            confidence,
            bar.close,
            phase,
            current,
        );
        signal.reasoning = reasoning;
        Ok(signal)
    }
}
