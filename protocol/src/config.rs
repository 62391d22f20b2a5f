//! # Wallet Configuration & Constants
//!
//! Every magic number in CardVault lives here, next to the runtime
//! [`WalletConfig`] that lets a deployment override the tunable ones.
//!
//! The card payload constants (alphabet, separators, lengths) are frozen:
//! cards already in people's pockets were written with them. Changing any of
//! them breaks every card in circulation, so don't.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::cipher::KdfParams;
use crate::pipeline::gas::GasPolicy;

// ---------------------------------------------------------------------------
// Card Payload Format
// ---------------------------------------------------------------------------

/// The 64-symbol alphabet used for card ids and text-safe addresses.
/// A symbol's position is its digit value: `0` is zero, `-` is 63.
pub const CARD_ALPHABET: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_-";

/// Number of bits carried by one alphabet symbol.
pub const ALPHABET_BITS_PER_SYMBOL: u32 = 6;

/// Separator between the address, key and id parts of a card payload.
pub const PAYLOAD_SEPARATOR: char = ':';

/// Everything up to and including this marker is stripped before decoding.
pub const FRAGMENT_MARKER: char = '#';

/// Number of parts in a card payload: address, encrypted key, id.
pub const PAYLOAD_PARTS: usize = 3;

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Raw address length in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Canonical text length: `0x` + 40 hex digits.
pub const CANONICAL_ADDRESS_TEXT_LENGTH: usize = 2 + ADDRESS_LENGTH * 2;

// ---------------------------------------------------------------------------
// Key Cipher
// ---------------------------------------------------------------------------

/// Shortest PIN we accept. The PIN is a second factor next to physical
/// possession of the card, not the only secret.
pub const MIN_PIN_LENGTH: usize = 3;

/// secp256k1 secret key length.
pub const SECRET_KEY_LENGTH: usize = 32;

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes (96 bits).
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Random salt fed to Argon2id alongside the PIN.
pub const KDF_SALT_LENGTH: usize = 16;

/// First byte of every sealed key blob.
pub const CIPHER_BLOB_VERSION: u8 = 1;

/// Argon2id memory cost (KiB) for newly provisioned cards.
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 19 * 1024;

/// Argon2id passes for newly provisioned cards.
pub const DEFAULT_KDF_ITERATIONS: u32 = 2;

/// Argon2id lanes for newly provisioned cards.
pub const DEFAULT_KDF_LANES: u8 = 1;

/// Upper bounds accepted when reading parameters back out of a blob.
/// A tampered card must not be able to make us allocate gigabytes.
pub const MAX_KDF_MEMORY_KIB: u32 = 256 * 1024;
pub const MAX_KDF_ITERATIONS: u32 = 16;
pub const MAX_KDF_LANES: u8 = 8;

/// Characters of secret material kept visible on each side when redacting.
pub const REDACT_VISIBLE_CHARS: usize = 4;

// ---------------------------------------------------------------------------
// Chain & Fees
// ---------------------------------------------------------------------------

/// Chain the signing account is bound to unless configured otherwise.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// Decimal places of the native currency (wei per ether = 10^18).
pub const NATIVE_DECIMALS: u32 = 18;

/// Gas used by a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Safety margin applied on top of the node's gas estimate.
pub const DEFAULT_GAS_MARGIN_PERCENT: u64 = 20;

/// Margins below this are rejected by config validation.
pub const MIN_GAS_MARGIN_PERCENT: u64 = 10;

/// Gas ceiling for a simple transfer after the margin is applied.
pub const DEFAULT_GAS_CEILING: u64 = 50_000;

/// Gas limit used when the node cannot produce an estimate.
pub const DEFAULT_FALLBACK_GAS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Interval between receipt polls for a submitted transaction.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Receipt polls before a watcher gives up and leaves the record pending.
pub const MAX_RECEIPT_POLL_ATTEMPTS: u32 = 40;

/// Period of the background balance/quote refresh.
pub const BALANCE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the broadcast channels used for card and transaction events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// HTTP timeout for a single ledger JSON-RPC call.
pub const LEDGER_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`WalletConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunable wallet settings.
///
/// Every field has a default, so a config file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WalletConfig {
    /// EIP-155 chain id the signing account is bound to.
    pub chain_id: u64,
    /// Ledger JSON-RPC endpoint.
    pub rpc_url: String,
    /// Origin prepended to shareable card links.
    pub card_base_url: String,
    /// Milliseconds between receipt polls.
    pub receipt_poll_interval_ms: u64,
    /// Receipt polls before a watcher gives up.
    pub max_receipt_poll_attempts: u32,
    /// Gas sizing policy.
    pub gas: GasPolicy,
    /// Seconds between background balance refreshes.
    pub balance_refresh_interval_secs: u64,
    /// Where the session snapshot is persisted. `None` keeps it in memory.
    pub snapshot_path: Option<PathBuf>,
    /// Argon2id parameters for newly provisioned cards.
    pub kdf: KdfParams,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            card_base_url: "https://cardvault.app".to_string(),
            receipt_poll_interval_ms: RECEIPT_POLL_INTERVAL.as_millis() as u64,
            max_receipt_poll_attempts: MAX_RECEIPT_POLL_ATTEMPTS,
            gas: GasPolicy::default(),
            balance_refresh_interval_secs: BALANCE_REFRESH_INTERVAL.as_secs(),
            snapshot_path: None,
            kdf: KdfParams::default(),
        }
    }
}

impl WalletConfig {
    /// Loads a JSON config file and validates it.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the wallet misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid("chainId must be non-zero".into()));
        }
        if self.receipt_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "receiptPollIntervalMs must be non-zero".into(),
            ));
        }
        if self.max_receipt_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "maxReceiptPollAttempts must be non-zero".into(),
            ));
        }
        if self.balance_refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "balanceRefreshIntervalSecs must be non-zero".into(),
            ));
        }
        self.gas.validate().map_err(ConfigError::Invalid)?;
        self.kdf.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Receipt poll interval as a [`Duration`].
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Background refresh period as a [`Duration`].
    pub fn balance_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn alphabet_has_64_unique_symbols() {
        let mut symbols: Vec<char> = CARD_ALPHABET.chars().collect();
        assert_eq!(symbols.len(), 1 << ALPHABET_BITS_PER_SYMBOL);
        symbols.sort_unstable();
        symbols.dedup();
        assert_eq!(symbols.len(), 64);
    }

    #[test]
    fn alphabet_never_collides_with_separators() {
        assert!(!CARD_ALPHABET.contains(PAYLOAD_SEPARATOR));
        assert!(!CARD_ALPHABET.contains(FRAGMENT_MARKER));
        // Legacy base64 detection relies on these never being alphabet symbols.
        for c in ['=', '+', '/'] {
            assert!(!CARD_ALPHABET.contains(c));
        }
    }

    #[test]
    fn gas_defaults_are_sane() {
        assert!(DEFAULT_GAS_MARGIN_PERCENT >= MIN_GAS_MARGIN_PERCENT);
        assert!(TRANSFER_GAS * (100 + DEFAULT_GAS_MARGIN_PERCENT) / 100 <= DEFAULT_GAS_CEILING);
        assert!(DEFAULT_FALLBACK_GAS >= TRANSFER_GAS);
    }

    #[test]
    fn default_config_validates() {
        WalletConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_chain_id_rejected() {
        let config = WalletConfig {
            chain_id: 0,
            ..WalletConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_json_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "chainId": 137, "maxReceiptPollAttempts": 5 }}"#).unwrap();

        let config = WalletConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.chain_id, 137);
        assert_eq!(config.max_receipt_poll_attempts, 5);
        assert_eq!(config.receipt_poll_interval(), RECEIPT_POLL_INTERVAL);
    }

    #[test]
    fn malformed_json_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            WalletConfig::from_json_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
