//! # Transaction Module
//!
//! Value types, amounts, and signing for the legacy EIP-155 transactions a
//! card account sends.
//!
//! ## Architecture
//!
//! ```text
//! types.rs   — TransactionStatus, TxHash, SendRequest, Receipt, TransactionRecord
//! amount.rs  — decimal ether <-> u128 wei
//! rlp.rs     — the RLP subset legacy transactions need
//! signing.rs — LegacyTransaction and SigningAccount::sign_transaction
//! ```
//!
//! ## Design Decisions
//!
//! - All amounts are `u128` wei. No floating point anywhere near money.
//! - Only legacy (type 0) transactions with EIP-155 replay protection are
//!   produced. Every EVM chain still accepts them and they need no fee
//!   market data beyond `eth_gasPrice`.
//! - Transaction hashes are `keccak256` of the signed RLP bytes, which is
//!   exactly what the node will report back.

pub mod amount;
pub mod rlp;
pub mod signing;
pub mod types;

pub use amount::{format_ether, parse_ether, AmountError};
pub use signing::{LegacyTransaction, SignedTransaction};
pub use types::{
    CallRequest, Receipt, SendRequest, TransactionRecord, TransactionStatus, TxHash,
};
