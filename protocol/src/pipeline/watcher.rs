//! Receipt polling for a single broadcast transaction.

use std::time::Duration;

use tracing::{debug, warn};

use crate::ledger::LedgerClient;
use crate::transaction::TxHash;

/// How a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Mined with status 1.
    Confirmed,
    /// Mined with status 0.
    Failed,
    /// No receipt within the attempt budget. The transaction may still land.
    TimedOut,
}

/// Polls for `hash`'s receipt every `interval`, at most `max_attempts` times.
///
/// A failed poll counts as an attempt and is logged; it does not end the watch.
pub async fn watch_receipt(
    ledger: &dyn LedgerClient,
    hash: TxHash,
    interval: Duration,
    max_attempts: u32,
) -> WatchOutcome {
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;
        match ledger.get_receipt(hash).await {
            Ok(Some(receipt)) if receipt.success => return WatchOutcome::Confirmed,
            Ok(Some(_)) => return WatchOutcome::Failed,
            Ok(None) => debug!(%hash, attempt, "not mined yet"),
            Err(e) => warn!(%hash, attempt, error = %e, "receipt poll failed"),
        }
    }
    WatchOutcome::TimedOut
}
