//! Pipeline configuration loaded from TOML.
//!
//! Every tunable has a default except the `[safety]` thresholds: a missing safety
//! key fails parsing, and out-of-range values fail `validate()`. Either way the
//! pipeline never starts on an incomplete configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use confluence_core::domain::Timeframe;
use confluence_core::engine::SimulatorConfig;
use confluence_core::overlays::OverlayConfig;
use confluence_core::safety::SafetyConfig;
use confluence_core::signals::ConfluenceConfig;
use confluence_core::sizers::RiskConfig;
use confluence_core::ConfigError;

/// Content-addressable run identifier (blake3 hex of the serialized config).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Scan cadence and data window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Minimum minutes between actionable signals on one symbol.
    pub cooldown_minutes: i64,
    /// Bars fetched per symbol on each paper-trading scan.
    pub history_bars: usize,
    /// Fetch the next timeframe up for swing-level targets.
    pub use_higher_timeframe: bool,
    /// Close every open position when a backtest replay ends.
    pub close_at_end: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 15,
            history_bars: 500,
            use_higher_timeframe: true,
            close_at_end: true,
        }
    }
}

fn default_timeframe() -> Timeframe {
    Timeframe::H1
}

/// Complete configuration for the decision pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    #[serde(default)]
    pub overlays: OverlayConfig,
    /// Sizing tunables. The risk fraction, the position cap and the exchange minimum
    /// always come from `[safety]`.
    #[serde(default)]
    pub risk: RiskConfig,
    pub safety: SafetyConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every section. Called by `load`; call it again after editing a config
    /// in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::Missing("symbols".into()));
        }
        if let Some(bad) = self.symbols.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid("symbols", format!("blank symbol {bad:?}")));
        }
        if self.scheduling.cooldown_minutes < 0 {
            return Err(ConfigError::invalid("scheduling.cooldown_minutes", "must be >= 0"));
        }
        if self.scheduling.history_bars < 2 {
            return Err(ConfigError::invalid("scheduling.history_bars", "must be >= 2"));
        }
        self.safety.validate()?;
        self.confluence.validate()?;
        self.overlays.validate()?;
        self.risk_config().validate()?;
        self.simulator_config().validate()
    }

    /// The sizing config with the safety-owned limits applied.
    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            fixed_risk_fraction: self.safety.fixed_risk_fraction,
            max_position_value: self.safety.max_position_size,
            min_notional: self.safety.min_position_value,
            ..self.risk.clone()
        }
    }

    /// The simulator config with the correlation overlay's heat cap and fallback
    /// correlation, so the overlay and the acceptance re-check agree.
    pub fn simulator_config(&self) -> SimulatorConfig {
        let correlation = &self.overlays.correlation;
        SimulatorConfig {
            max_heat: correlation.max_heat,
            default_correlation: correlation.default_correlation,
            ..self.simulator.clone()
        }
    }

    /// Deterministic identifier for this configuration.
    pub fn run_id(&self) -> Result<RunId, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }
}
