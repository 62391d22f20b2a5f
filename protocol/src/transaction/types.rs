//! Core transaction value types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::Address;

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a submitted transaction.
///
/// Transactions are `Pending` from broadcast until a receipt is seen, then
/// `Confirmed` if the chain reports success or `Failed` if it reports a
/// revert. Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Broadcast, no receipt yet.
    Pending,
    /// Receipt reported success.
    Confirmed,
    /// Receipt reported a revert.
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// TxHash
// ---------------------------------------------------------------------------

/// A 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Error parsing a [`TxHash`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transaction hash must be 0x followed by 64 hex digits")]
pub struct ParseTxHashError;

impl FromStr for TxHash {
    type Err = ParseTxHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").ok_or(ParseTxHashError)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| ParseTxHashError)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Requests & Receipts
// ---------------------------------------------------------------------------

/// A value transfer as asked for by a user or a peer, before validation.
///
/// `to` stays text until the pipeline checks it, so a bad destination
/// surfaces as `InvalidAddress` rather than a parse failure upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub to: String,
    pub value_wei: u128,
    /// Gas limit chosen by the peer. Honored as-is when present.
    pub gas_limit: Option<u64>,
    pub data: Vec<u8>,
}

impl SendRequest {
    /// Plain transfer with no calldata and no explicit gas limit.
    pub fn transfer(to: impl Into<String>, value_wei: u128) -> Self {
        Self {
            to: to.into(),
            value_wei,
            gas_limit: None,
            data: Vec::new(),
        }
    }
}

/// Call shape handed to the ledger for gas estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value_wei: u128,
    pub data: Vec<u8>,
}

/// What the ledger reports once a transaction is mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    /// `true` for status 1, `false` for a revert.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// One entry in the local transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub from: Address,
    pub to: Address,
    /// Transferred value as a decimal ether string, e.g. `"1.5"`.
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// A freshly broadcast record.
    pub fn pending(hash: TxHash, from: Address, to: Address, value: String) -> Self {
        Self {
            hash,
            from,
            to,
            value,
            created_at: Utc::now(),
            status: TransactionStatus::Pending,
            confirmed_at: None,
        }
    }
}
