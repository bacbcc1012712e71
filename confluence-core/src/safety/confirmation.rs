//! Trade confirmation: manual approval is the default; orders pass only when
//! auto-trading is explicitly enabled.

use super::{GuardContext, SafetyGuard, SafetyViolation};

#[derive(Debug, Clone)]
pub struct TradeConfirmation {
    require_confirmation: bool,
}

impl TradeConfirmation {
    pub fn new(require_confirmation: bool) -> Self {
        Self {
            require_confirmation,
        }
    }
}

impl Default for TradeConfirmation {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SafetyGuard for TradeConfirmation {
    fn name(&self) -> &str {
        "confirmation"
    }

    fn check(&self, _ctx: &GuardContext) -> Result<(), SafetyViolation> {
        if self.require_confirmation {
            Err(SafetyViolation::ConfirmationRequired)
        } else {
            Ok(())
        }
    }
}
