//! # Signing Account
//!
//! secp256k1 identity derived from an unlocked card key.
//!
//! A [`SigningAccount`] is bound to exactly one chain id at construction.
//! It signs EIP-191 `personal_sign` messages here and legacy EIP-155
//! transactions in [`crate::transaction::signing`].
//!
//! ## Security considerations
//!
//! - `k256::ecdsa::SigningKey` zeroizes its scalar on drop.
//! - Signatures are RFC 6979 deterministic and low-S normalized.
//! - Key bytes are never logged. `Debug` prints the address only.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;

use crate::codec::Address;

use super::cipher::SecretKey;
use super::hash::keccak256_concat;

/// Errors from key and signature operations. Intentionally vague.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("secret key is not a valid secp256k1 scalar")]
    InvalidSecretKey,

    #[error("signing failed")]
    SigningFailed,

    #[error("signature is malformed or does not recover")]
    InvalidSignature,
}

/// An ECDSA signature with its public-key recovery bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 0 or 1.
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// 65-byte `r || s || v` with `v = 27 + recovery_id`, the `personal_sign` form.
    pub fn to_rsv_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = 27 + self.recovery_id;
        out
    }

    /// Parses the 65-byte `personal_sign` form. Accepts `v` as 0/1 or 27/28.
    pub fn from_rsv_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 65 {
            return Err(KeyError::InvalidSignature);
        }
        let recovery_id = match bytes[64] {
            0 | 27 => 0,
            1 | 28 => 1,
            _ => return Err(KeyError::InvalidSignature),
        };
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }

    /// `0x`-prefixed hex of [`to_rsv_bytes`](Self::to_rsv_bytes).
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_rsv_bytes()))
    }
}

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// EIP-191 digest: `keccak256("\x19Ethereum Signed Message:\n" || len || message)`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let len = message.len().to_string();
    keccak256_concat(&[PERSONAL_MESSAGE_PREFIX, len.as_bytes(), message])
}

/// Recovers the signer address of a 32-byte digest.
pub fn recover_address(digest: &[u8; 32], sig: &RecoverableSignature) -> Result<Address, KeyError> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&sig.r);
    rs[32..].copy_from_slice(&sig.s);
    let signature = Signature::from_slice(&rs).map_err(|_| KeyError::InvalidSignature)?;
    let recovery_id =
        RecoveryId::from_byte(sig.recovery_id).ok_or(KeyError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| KeyError::InvalidSignature)?;
    Ok(address_of(&key))
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let mut xy = [0u8; 64];
    // Uncompressed SEC1 is 0x04 || x || y.
    xy.copy_from_slice(&point.as_bytes()[1..65]);
    Address::from_public_key(&xy)
}

// ---------------------------------------------------------------------------
// SigningAccount
// ---------------------------------------------------------------------------

/// A live signing identity bound to one chain.
pub struct SigningAccount {
    signing_key: SigningKey,
    address: Address,
    chain_id: u64,
}

impl SigningAccount {
    /// Derives the account for `secret` on `chain_id`.
    pub fn from_secret(secret: &SecretKey, chain_id: u64) -> Result<Self, KeyError> {
        let signing_key =
            SigningKey::from_slice(secret.as_bytes()).map_err(|_| KeyError::InvalidSecretKey)?;
        let address = address_of(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// CAIP-10 account id, e.g. `eip155:1:0xabc…`.
    pub fn caip_account(&self) -> String {
        format!("eip155:{}:{}", self.chain_id, self.address)
    }

    /// Signs a 32-byte digest as-is.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, KeyError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|_| KeyError::SigningFailed)?;
        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }

    /// EIP-191 `personal_sign`.
    pub fn sign_message(&self, message: &[u8]) -> Result<RecoverableSignature, KeyError> {
        self.sign_digest(&personal_message_hash(message))
    }
}

impl fmt::Debug for SigningAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAccount")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
