//! Safety guard chain: the last gate before an order is accepted.
//!
//! Guards run in a fixed order (emergency stop, daily loss, position validator,
//! confirmation) and the chain reports the first failure. Every guard is a pure check
//! over a `GuardContext`; the daily-loss state it reads is advanced by the caller so
//! that persistence can succeed or fail before anything is committed.

pub mod confirmation;
pub mod daily_loss;
pub mod emergency_stop;
pub mod position_validator;

pub use confirmation::TradeConfirmation;
pub use daily_loss::DailyLossTracker;
pub use emergency_stop::EmergencyStop;
pub use position_validator::PositionValidator;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::DailyRiskState;
use crate::error::{require_positive, ConfigError};

/// Safety thresholds. Only the exchange minimum has a default: every other key must
/// be present in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Daily loss limit in percent of the day's starting balance.
    pub max_daily_loss_percent: f64,
    /// Maximum position value in quote currency.
    pub max_position_size: f64,
    /// Maximum risk_amount / balance for a single position.
    pub max_portfolio_risk: f64,
    pub require_confirmation: bool,
    pub emergency_stop_file: PathBuf,
    pub emergency_stop_env: String,
    pub fixed_risk_fraction: f64,
    #[serde(default = "default_min_position_value")]
    pub min_position_value: f64,
}

fn default_min_position_value() -> f64 {
    5.0
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("safety.max_daily_loss_percent", self.max_daily_loss_percent)?;
        if self.max_daily_loss_percent >= 100.0 {
            return Err(ConfigError::invalid(
                "safety.max_daily_loss_percent",
                "must be below 100",
            ));
        }
        require_positive("safety.max_position_size", self.max_position_size)?;
        require_positive("safety.max_portfolio_risk", self.max_portfolio_risk)?;
        require_positive("safety.fixed_risk_fraction", self.fixed_risk_fraction)?;
        require_positive("safety.min_position_value", self.min_position_value)?;
        if self.min_position_value > self.max_position_size {
            return Err(ConfigError::invalid(
                "safety.min_position_value",
                "must not exceed max_position_size",
            ));
        }
        if self.emergency_stop_env.trim().is_empty() {
            return Err(ConfigError::Missing("safety.emergency_stop_env".into()));
        }
        Ok(())
    }
}

/// Why the chain blocked an order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SafetyViolation {
    #[error("emergency stop active ({0})")]
    EmergencyStop(String),
    #[error("daily loss limit reached: {pnl_pct:.2}% vs limit -{limit_pct:.2}%")]
    DailyLossLimit { pnl_pct: f64, limit_pct: f64 },
    #[error("position too large: {value:.2} > {max:.2}")]
    PositionTooLarge { value: f64, max: f64 },
    #[error("insufficient balance: position {value:.2} > balance {balance:.2}")]
    InsufficientBalance { value: f64, balance: f64 },
    #[error("portfolio risk too high: {risk:.4} > {max:.4}")]
    PortfolioRiskExceeded { risk: f64, max: f64 },
    #[error("position too small: {value:.2} < {min:.2}")]
    PositionTooSmall { value: f64, min: f64 },
    #[error("manual confirmation required")]
    ConfirmationRequired,
}

/// Inputs for one order decision.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub now: DateTime<Utc>,
    pub balance: f64,
    pub position_value: f64,
    pub risk_amount: f64,
    /// The day's risk state, already advanced to `now` and `balance`.
    pub daily: &'a DailyRiskState,
}

pub trait SafetyGuard: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, ctx: &GuardContext) -> Result<(), SafetyViolation>;
}

/// One guard's verdict in an audit.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardReport {
    pub guard: String,
    pub verdict: Result<(), SafetyViolation>,
}

/// Ordered, short-circuiting guard list.
pub struct SafetyChain {
    guards: Vec<Box<dyn SafetyGuard>>,
    daily: DailyLossTracker,
}

impl SafetyChain {
    /// The four standard guards in their fixed order.
    pub fn new(config: &SafetyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let daily = DailyLossTracker::new(config.max_daily_loss_percent);
        let guards: Vec<Box<dyn SafetyGuard>> = vec![
            Box::new(EmergencyStop::new(
                Some(config.emergency_stop_file.clone()),
                Some(config.emergency_stop_env.clone()),
            )),
            Box::new(daily.clone()),
            Box::new(PositionValidator::new(
                config.max_position_size,
                config.max_portfolio_risk,
                config.min_position_value,
            )),
            Box::new(TradeConfirmation::new(config.require_confirmation)),
        ];
        Ok(Self { guards, daily })
    }

    pub fn names(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    /// The daily-loss tracker, for advancing the day state ahead of `check`.
    pub fn daily_loss(&self) -> &DailyLossTracker {
        &self.daily
    }

    /// First failing guard, in order.
    pub fn check(&self, ctx: &GuardContext) -> Result<(), SafetyViolation> {
        for guard in &self.guards {
            if let Err(violation) = guard.check(ctx) {
                warn!(guard = guard.name(), %violation, "safety violation");
                return Err(violation);
            }
        }
        Ok(())
    }

    /// Run every guard and report each verdict, without short-circuiting.
    pub fn audit(&self, ctx: &GuardContext) -> Vec<GuardReport> {
        self.guards
            .iter()
            .map(|g| GuardReport {
                guard: g.name().to_string(),
                verdict: g.check(ctx),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::t0;

    pub(crate) fn config(dir: &std::path::Path) -> SafetyConfig {
        SafetyConfig {
            max_daily_loss_percent: 5.0,
            max_position_size: 10.0,
            max_portfolio_risk: 0.02,
            require_confirmation: false,
            emergency_stop_file: dir.join("EMERGENCY_STOP"),
            emergency_stop_env: "CONFLUENCE_TEST_CHAIN_STOP_UNSET".into(),
            fixed_risk_fraction: 0.01,
            min_position_value: 5.0,
        }
    }

    fn ctx(daily: &DailyRiskState, value: f64) -> GuardContext<'_> {
        GuardContext {
            now: t0(),
            balance: daily.current_balance,
            position_value: value,
            risk_amount: 0.5,
            daily,
        }
    }

    #[test]
    fn guard_order_is_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let chain = SafetyChain::new(&config(dir.path())).unwrap();
        assert_eq!(
            chain.names(),
            ["emergency_stop", "daily_loss", "position_validator", "confirmation"]
        );
    }

    #[test]
    fn first_failure_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.require_confirmation = true;
        let chain = SafetyChain::new(&cfg).unwrap();
        // Daily loss and oversize both fail; daily loss comes first.
        let daily = DailyRiskState::start(t0().date_naive(), 50.0).advanced(t0(), 47.0);
        assert!(matches!(
            chain.check(&ctx(&daily, 15.0)),
            Err(SafetyViolation::DailyLossLimit { .. })
        ));
        // Emergency stop beats everything.
        std::fs::write(dir.path().join("EMERGENCY_STOP"), "").unwrap();
        assert!(matches!(
            chain.check(&ctx(&daily, 15.0)),
            Err(SafetyViolation::EmergencyStop(_))
        ));
    }

    #[test]
    fn audit_reports_every_guard() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.require_confirmation = true;
        let chain = SafetyChain::new(&cfg).unwrap();
        let daily = DailyRiskState::start(t0().date_naive(), 50.0);
        let reports = chain.audit(&ctx(&daily, 15.0));
        assert_eq!(reports.len(), 4);
        assert!(reports[0].verdict.is_ok());
        assert!(reports[1].verdict.is_ok());
        assert!(matches!(
            reports[2].verdict,
            Err(SafetyViolation::PositionTooLarge { .. })
        ));
        assert_eq!(reports[3].verdict, Err(SafetyViolation::ConfirmationRequired));
    }

    #[test]
    fn healthy_order_passes() {
        let dir = tempfile::tempdir().unwrap();
        let chain = SafetyChain::new(&config(dir.path())).unwrap();
        let daily = DailyRiskState::start(t0().date_naive(), 50.0);
        assert!(chain.check(&ctx(&daily, 8.0)).is_ok());
    }

    #[test]
    fn invalid_config_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_daily_loss_percent = 0.0;
        assert!(SafetyChain::new(&cfg).is_err());
        let mut cfg = config(dir.path());
        cfg.max_position_size = f64::NAN;
        assert!(SafetyChain::new(&cfg).is_err());
    }
}
