//! # Ledger Client
//!
//! The chain as CardVault sees it: six asynchronous calls, any of which may
//! fail with a network error.
//!
//! ```text
//! mod.rs  — LedgerClient trait, LedgerError, hex quantity helpers
//! rpc.rs  — JSON-RPC 2.0 envelope types and JsonRpcLedger over HTTP
//! mock.rs — MockLedger, a scriptable in-memory ledger with call counters
//! ```

pub mod mock;
pub mod rpc;

pub use mock::{LedgerMethod, MockLedger, ReceiptScript};
pub use rpc::JsonRpcLedger;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::Address;
use crate::transaction::{CallRequest, Receipt, TxHash};

/// Ledger call failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The request never got a usable HTTP answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("node error ({code}): {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("request timed out")]
    Timeout,
}

/// Everything the wallet needs from a chain node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest balance in wei.
    async fn get_balance(&self, address: Address) -> Result<u128, LedgerError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, LedgerError>;

    /// Node-side gas estimate for `call`, before any margin.
    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, LedgerError>;

    /// Pending nonce for `address`.
    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError>;

    /// Broadcasts signed RLP bytes and returns the node's hash for them.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError>;

    /// `None` while the transaction is not mined yet.
    async fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError>;
}

// ---------------------------------------------------------------------------
// Hex quantities
// ---------------------------------------------------------------------------

/// Encodes an integer as a JSON-RPC quantity: `0x`, no leading zeros, `0x0` for zero.
pub fn to_quantity(value: u128) -> String {
    format!("{value:#x}")
}

/// Parses a JSON-RPC quantity.
pub fn parse_quantity(text: &str) -> Result<u128, LedgerError> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Decode(format!("quantity without 0x prefix: {text}")))?;
    if digits.is_empty() {
        return Err(LedgerError::Decode("empty quantity".into()));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::Decode(format!("bad quantity: {text}")))
}
