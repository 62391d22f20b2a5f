//! # Cryptographic Primitives
//!
//! Everything that touches key material lives here:
//!
//! - **Argon2id + AES-256-GCM** seal the card key under the PIN ([`cipher`]).
//! - **secp256k1** signs messages and transactions ([`keys`]).
//! - **Keccak-256** hashes addresses, messages and transactions ([`hash`]).
//!
//! Nothing here is hand-rolled; these are thin typed wrappers around the
//! RustCrypto implementations.

pub mod cipher;
pub mod hash;
pub mod keys;
pub mod redact;

pub use cipher::{validate_pin, CipherError, KdfParams, KeyCipher, SecretKey};
pub use hash::keccak256;
pub use keys::{personal_message_hash, recover_address, KeyError, RecoverableSignature, SigningAccount};
pub use redact::redact;
