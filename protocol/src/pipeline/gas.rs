//! Gas limit sizing.
//!
//! ```text
//! limit = min(estimate * (100 + margin) / 100, ceiling)   when the node estimates
//! limit = fallback                                         when it cannot
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{
    DEFAULT_FALLBACK_GAS, DEFAULT_GAS_CEILING, DEFAULT_GAS_MARGIN_PERCENT, MIN_GAS_MARGIN_PERCENT,
    TRANSFER_GAS,
};
use crate::ledger::LedgerClient;
use crate::transaction::CallRequest;

/// How a node estimate becomes a gas limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GasPolicy {
    /// Percentage added on top of the node's estimate.
    pub margin_percent: u64,
    /// Hard upper bound on the limit.
    pub ceiling: u64,
    /// Limit used when estimation fails.
    pub fallback: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            margin_percent: DEFAULT_GAS_MARGIN_PERCENT,
            ceiling: DEFAULT_GAS_CEILING,
            fallback: DEFAULT_FALLBACK_GAS,
        }
    }
}

impl GasPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.margin_percent < MIN_GAS_MARGIN_PERCENT {
            return Err(format!(
                "gas margin must be at least {MIN_GAS_MARGIN_PERCENT}%, got {}%",
                self.margin_percent
            ));
        }
        if self.ceiling < TRANSFER_GAS {
            return Err(format!(
                "gas ceiling {} is below a plain transfer ({TRANSFER_GAS})",
                self.ceiling
            ));
        }
        if self.fallback < TRANSFER_GAS || self.fallback > self.ceiling {
            return Err(format!(
                "fallback gas {} must lie between {TRANSFER_GAS} and the ceiling {}",
                self.fallback, self.ceiling
            ));
        }
        Ok(())
    }

    /// Applies the margin and the ceiling to a node estimate.
    pub fn apply(&self, estimate: u64) -> u64 {
        let padded = u128::from(estimate) * u128::from(100 + self.margin_percent) / 100;
        u64::try_from(padded).unwrap_or(u64::MAX).min(self.ceiling)
    }
}

/// Sizes the gas limit for `call`. Never fails: a ledger error yields the
/// policy's fallback.
pub async fn estimate_gas(ledger: &dyn LedgerClient, call: &CallRequest, policy: &GasPolicy) -> u64 {
    match ledger.estimate_gas(call).await {
        Ok(estimate) => policy.apply(estimate),
        Err(e) => {
            warn!(error = %e, fallback = policy.fallback, "gas estimation failed, using fallback");
            policy.fallback
        }
    }
}
