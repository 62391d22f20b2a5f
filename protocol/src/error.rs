//! Top-level error taxonomy.
//!
//! Each module has its own `thiserror` enum; they all fold into
//! [`WalletError`] at the [`CardWallet`](crate::wallet::CardWallet) boundary.
//! Display strings are short and user-facing. Internal causes are logged
//! where they happen, with secrets redacted, and never carried here.

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::{CipherError, KeyError};
use crate::ledger::LedgerError;
use crate::tag::TagError;

/// Everything a wallet operation can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The card payload could not be decoded.
    #[error("card data is malformed: {0}")]
    MalformedCredential(#[from] CodecError),

    /// The PIN violates the format rule; no decryption was attempted.
    #[error("PIN is too short")]
    InvalidPin,

    /// Wrong PIN or damaged ciphertext. The two are indistinguishable.
    #[error("wrong PIN or damaged card")]
    DecryptionFailed,

    /// A freshly sealed key did not open back to itself.
    #[error("card key could not be sealed safely")]
    EncryptionVerificationFailed,

    /// The operation needs a bound signing account and there is none.
    #[error("wallet is locked")]
    WalletNotUnlocked,

    /// The operation needs a card and none is set.
    #[error("no card")]
    NoCard,

    /// The card was replaced while an unlock was in progress.
    #[error("card changed during unlock")]
    CardChanged,

    /// Value plus estimated fee exceeds the balance.
    #[error("insufficient balance: need {required} wei, have {available} wei")]
    InsufficientBalance { required: u128, available: u128 },

    /// A peer asked for a method outside the allow-list.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The ledger could not be reached or answered with an error.
    #[error("network error: {0}")]
    Network(String),

    /// Confirmation polling ran out of attempts. The transaction may still land.
    #[error("still pending after the confirmation budget")]
    Timeout,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The NFC tag transport failed.
    #[error("card reader: {0}")]
    Tag(String),

    /// A broken invariant. Not something a user can fix by retrying.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// `true` for expected failures a user can correct (bad input, wrong
    /// PIN, flaky network). `false` for precondition violations and
    /// internal faults, which callers should treat as bugs in the flow.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            WalletError::EncryptionVerificationFailed
                | WalletError::WalletNotUnlocked
                | WalletError::NoCard
                | WalletError::Internal(_)
        )
    }
}

impl From<CipherError> for WalletError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::InvalidPin => WalletError::InvalidPin,
            CipherError::DecryptionFailed => WalletError::DecryptionFailed,
            CipherError::EncryptionVerificationFailed => WalletError::EncryptionVerificationFailed,
            CipherError::InvalidKey => WalletError::InvalidRequest(e.to_string()),
            CipherError::EncryptionFailed => WalletError::Internal(e.to_string()),
        }
    }
}

impl From<KeyError> for WalletError {
    fn from(e: KeyError) -> Self {
        WalletError::Internal(e.to_string())
    }
}

impl From<LedgerError> for WalletError {
    fn from(e: LedgerError) -> Self {
        WalletError::Network(e.to_string())
    }
}

impl From<TagError> for WalletError {
    fn from(e: TagError) -> Self {
        WalletError::Tag(e.to_string())
    }
}
