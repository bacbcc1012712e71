//! Emergency stop: a sentinel file or an environment flag halts all trading.

use std::path::PathBuf;

use super::{GuardContext, SafetyGuard, SafetyViolation};

#[derive(Debug, Clone)]
pub struct EmergencyStop {
    file: Option<PathBuf>,
    env_var: Option<String>,
}

impl EmergencyStop {
    pub fn new(file: Option<PathBuf>, env_var: Option<String>) -> Self {
        Self { file, env_var }
    }

    /// The sentinel that is currently tripped, if any.
    pub fn active_source(&self) -> Option<String> {
        if let Some(path) = &self.file {
            if path.exists() {
                return Some(format!("file {}", path.display()));
            }
        }
        if let Some(name) = &self.env_var {
            if std::env::var(name).is_ok_and(|v| v.trim().eq_ignore_ascii_case("true")) {
                return Some(format!("env {name}"));
            }
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.active_source().is_some()
    }
}

impl SafetyGuard for EmergencyStop {
    fn name(&self) -> &str {
        "emergency_stop"
    }

    fn check(&self, _ctx: &GuardContext) -> Result<(), SafetyViolation> {
        match self.active_source() {
            Some(source) => Err(SafetyViolation::EmergencyStop(source)),
            None => Ok(()),
        }
    }
}
