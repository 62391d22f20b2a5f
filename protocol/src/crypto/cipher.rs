//! # Key Cipher
//!
//! PIN-based sealing of the card's private key. This is the only place the
//! plaintext key exists outside an unlocked [`CardSession`].
//!
//! ## Construction
//!
//! - **Argon2id** stretches the PIN and a random 16-byte salt into a 256-bit
//!   key. PINs are short, so the KDF carries the weight; the other factor is
//!   physical possession of the card.
//! - **AES-256-GCM** seals the key's 64-character lowercase hex form under a
//!   random 96-bit nonce. The blob header is bound as associated data, so
//!   tampering with the stored KDF parameters fails authentication.
//!
//! ## Blob layout
//!
//! ```text
//! version (1) | m_cost u32 LE (4) | t_cost u32 LE (4) | p_cost (1) | salt (16) | nonce (12) | ciphertext + tag
//! ```
//!
//! Every decrypt failure collapses to [`CipherError::DecryptionFailed`].
//! Wrong PIN, truncated blob, unknown version and corrupted ciphertext look
//! identical from the outside, which leaves nothing to learn from guessing
//! beyond success or failure.
//!
//! [`CardSession`]: crate::session::CardSession

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::config::{
    AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH, CIPHER_BLOB_VERSION, DEFAULT_KDF_ITERATIONS,
    DEFAULT_KDF_LANES, DEFAULT_KDF_MEMORY_KIB, KDF_SALT_LENGTH, MAX_KDF_ITERATIONS, MAX_KDF_LANES,
    MAX_KDF_MEMORY_KIB, MIN_PIN_LENGTH, SECRET_KEY_LENGTH,
};

use super::redact::redact;

/// Fixed-size prefix before the ciphertext.
const HEADER_LENGTH: usize = 1 + 4 + 4 + 1 + KDF_SALT_LENGTH + AES_NONCE_LENGTH;

/// Portion of the header that describes the KDF and is authenticated as AAD.
const AAD_LENGTH: usize = 1 + 4 + 4 + 1 + KDF_SALT_LENGTH;

/// Argon2 needs at least 8 KiB of memory per lane.
const MIN_KDF_MEMORY_KIB_PER_LANE: u32 = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Key cipher failures. Messages never include the PIN or key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("PIN must be at least {MIN_PIN_LENGTH} characters")]
    InvalidPin,

    #[error("private key must be {SECRET_KEY_LENGTH} bytes of hex")]
    InvalidKey,

    #[error("could not decrypt the card key: wrong PIN or damaged card")]
    DecryptionFailed,

    #[error("encrypted key failed its self-check")]
    EncryptionVerificationFailed,

    #[error("encryption failed")]
    EncryptionFailed,
}

// ---------------------------------------------------------------------------
// PIN
// ---------------------------------------------------------------------------

/// Returns `true` when `pin` meets the minimum length.
///
/// ```
/// use cardvault_protocol::crypto::validate_pin;
///
/// assert!(!validate_pin("1"));
/// assert!(validate_pin("123"));
/// ```
pub fn validate_pin(pin: &str) -> bool {
    pin.chars().count() >= MIN_PIN_LENGTH
}

// ---------------------------------------------------------------------------
// SecretKey
// ---------------------------------------------------------------------------

/// A 32-byte secp256k1 secret, wiped from memory on drop.
///
/// Deliberately not `Clone`, `Serialize` or `Display`.
pub struct SecretKey(Zeroizing<[u8; SECRET_KEY_LENGTH]>);

impl SecretKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Parses 64 hex characters, with or without a `0x` prefix.
    pub fn from_hex(text: &str) -> Result<Self, CipherError> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.len() != SECRET_KEY_LENGTH * 2 {
            return Err(CipherError::InvalidKey);
        }
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
        hex::decode_to_slice(digits, &mut bytes[..]).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self(bytes))
    }

    /// Generates a fresh key from the OS RNG. Used when provisioning blank cards.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex, itself wiped on drop.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.0[..]))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", redact(&self.to_hex()))
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        // Only used by tests and the encrypt self-check; both sides are ours.
        self.0[..] == other.0[..]
    }
}

impl Eq for SecretKey {}

// ---------------------------------------------------------------------------
// KDF parameters
// ---------------------------------------------------------------------------

/// Argon2id cost parameters. Stored in every blob so they can change
/// without orphaning existing cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u8,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_KDF_MEMORY_KIB,
            iterations: DEFAULT_KDF_ITERATIONS,
            lanes: DEFAULT_KDF_LANES,
        }
    }
}

impl KdfParams {
    /// Cheap profile for tests and benchmarks. Never provision real cards
    /// with this.
    pub const fn light() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            lanes: 1,
        }
    }

    /// Checks the parameters against the accepted bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.lanes == 0 || self.lanes > MAX_KDF_LANES {
            return Err(format!("kdf lanes must be between 1 and {MAX_KDF_LANES}"));
        }
        if self.iterations == 0 || self.iterations > MAX_KDF_ITERATIONS {
            return Err(format!(
                "kdf iterations must be between 1 and {MAX_KDF_ITERATIONS}"
            ));
        }
        let min_memory = MIN_KDF_MEMORY_KIB_PER_LANE * u32::from(self.lanes);
        if self.memory_kib < min_memory || self.memory_kib > MAX_KDF_MEMORY_KIB {
            return Err(format!(
                "kdf memory must be between {min_memory} and {MAX_KDF_MEMORY_KIB} KiB"
            ));
        }
        Ok(())
    }

    fn derive_key(
        &self,
        pin: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, argon2::Error> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            u32::from(self.lanes),
            Some(AES_KEY_LENGTH),
        )?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        argon2.hash_password_into(pin.as_bytes(), salt, &mut key[..])?;
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// KeyCipher
// ---------------------------------------------------------------------------

/// Seals and opens card keys.
///
/// The configured [`KdfParams`] only affect [`encrypt`](Self::encrypt);
/// [`decrypt`](Self::decrypt) always uses the parameters recorded in the blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyCipher {
    params: KdfParams,
}

impl KeyCipher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Parameters used for new blobs.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Seals `raw_key_hex` (64 hex characters, optional `0x`) under `pin`.
    ///
    /// The fresh blob is decrypted again before it is returned; a blob that
    /// does not open back to the same key is never handed out.
    pub fn encrypt(&self, raw_key_hex: &str, pin: &str) -> Result<Vec<u8>, CipherError> {
        if !validate_pin(pin) {
            return Err(CipherError::InvalidPin);
        }
        let key = SecretKey::from_hex(raw_key_hex)?;
        self.params.validate().map_err(|reason| {
            error!(%reason, "refusing to encrypt with out-of-range kdf parameters");
            CipherError::EncryptionFailed
        })?;

        let mut salt = [0u8; KDF_SALT_LENGTH];
        let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let mut blob = Vec::with_capacity(HEADER_LENGTH + SECRET_KEY_LENGTH * 2 + AES_TAG_LENGTH);
        blob.push(CIPHER_BLOB_VERSION);
        blob.extend_from_slice(&self.params.memory_kib.to_le_bytes());
        blob.extend_from_slice(&self.params.iterations.to_le_bytes());
        blob.push(self.params.lanes);
        blob.extend_from_slice(&salt);

        let aes_key = self.params.derive_key(pin, &salt).map_err(|e| {
            error!(error = %e, "kdf failed during encryption");
            CipherError::EncryptionFailed
        })?;
        let cipher =
            Aes256Gcm::new_from_slice(&aes_key[..]).map_err(|_| CipherError::EncryptionFailed)?;
        let plaintext = key.to_hex();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &blob[..AAD_LENGTH],
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        match self.decrypt(&blob, pin) {
            Ok(check) if check == key => {
                debug!(blob_len = blob.len(), "card key sealed and verified");
                Ok(blob)
            }
            _ => {
                error!("sealed card key did not round-trip");
                Err(CipherError::EncryptionVerificationFailed)
            }
        }
    }

    /// Opens a blob produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, blob: &[u8], pin: &str) -> Result<SecretKey, CipherError> {
        if !validate_pin(pin) {
            return Err(CipherError::InvalidPin);
        }
        open(blob, pin).ok_or(CipherError::DecryptionFailed)
    }
}

/// Every failure is `None`; callers map it to one error kind.
fn open(blob: &[u8], pin: &str) -> Option<SecretKey> {
    if blob.len() < HEADER_LENGTH + AES_TAG_LENGTH || blob[0] != CIPHER_BLOB_VERSION {
        return None;
    }
    let params = KdfParams {
        memory_kib: u32::from_le_bytes(blob[1..5].try_into().ok()?),
        iterations: u32::from_le_bytes(blob[5..9].try_into().ok()?),
        lanes: blob[9],
    };
    if params.validate().is_err() {
        return None;
    }
    let salt = &blob[10..AAD_LENGTH];
    let nonce = &blob[AAD_LENGTH..HEADER_LENGTH];
    let ciphertext = &blob[HEADER_LENGTH..];

    let aes_key = params.derive_key(pin, salt).ok()?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key[..]).ok()?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &blob[..AAD_LENGTH],
                },
            )
            .ok()?,
    );

    if plaintext.len() != SECRET_KEY_LENGTH * 2 || !plaintext.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(&plaintext).ok()?;
    SecretKey::from_hex(text).ok()
}
