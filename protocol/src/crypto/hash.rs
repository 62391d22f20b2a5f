//! # Hashing Utilities
//!
//! Keccak-256 is the only hash CardVault needs: addresses, EIP-55
//! checksums, EIP-191 message digests and transaction hashes all use it.
//!
//! Note this is the original Keccak padding, not NIST SHA3-256. The two
//! produce different digests for the same input; the chain expects Keccak.

use sha3::{Digest, Keccak256};

/// Keccak-256 of `data`.
///
/// ```
/// use cardvault_protocol::crypto::keccak256;
///
/// let digest = keccak256(b"");
/// assert_eq!(
///     hex::encode(digest),
///     "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
/// );
/// ```
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over several slices without concatenating them first.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
