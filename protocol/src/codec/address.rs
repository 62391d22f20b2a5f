//! Chain addresses and the card's historical address encodings.
//!
//! Cards have carried their address three ways over time:
//!
//! ```text
//! 0x52908400098527886E0F7030069857D2E4169EE7   canonical hex (42 chars)
//! 5agx009xiu8rwZMc0qolZbA5FXD                 card alphabet (current writer)
//! UpCEAAmFJ4huD3AwBphX0uQWnuc=                base64 of the raw bytes (legacy)
//! ```
//!
//! [`CardAddress::parse`] folds all three into one canonical [`Address`].
//! Legacy text that does not convert cleanly is kept verbatim as
//! [`CardAddress::Unresolved`] so old cards still load; such a card can be
//! displayed but its address is never used for signing or balance lookups.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::config::{ADDRESS_LENGTH, CANONICAL_ADDRESS_TEXT_LENGTH};
use crate::crypto::hash::keccak256;

use super::alphabet::{bytes_to_text, text_to_bytes};
use super::CodecError;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Wraps raw address bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives the address of an uncompressed secp256k1 public key given as
    /// the 64-byte `x || y` concatenation.
    pub fn from_public_key(xy: &[u8; 64]) -> Self {
        let digest = keccak256(xy);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// EIP-55 mixed-case checksum form.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(CANONICAL_ADDRESS_TEXT_LENGTH);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Text-safe card alphabet form.
    pub fn to_card_text(&self) -> String {
        bytes_to_text(&self.0)
    }
}

impl FromStr for Address {
    type Err = CodecError;

    /// Strict canonical parse: `0x` followed by exactly 40 hex digits, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| CodecError::MalformedAddress(format!("missing 0x prefix: {s}")))?;
        if s.len() != CANONICAL_ADDRESS_TEXT_LENGTH {
            return Err(CodecError::MalformedAddress(format!(
                "expected {CANONICAL_ADDRESS_TEXT_LENGTH} characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; ADDRESS_LENGTH];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| CodecError::MalformedAddress(format!("not hex: {s}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// CardAddress
// ---------------------------------------------------------------------------

/// An address as it was found on a card.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CardAddress {
    /// Canonical hex or card-alphabet text.
    Canonical(Address),
    /// Base64 of the raw bytes, written by early card firmware.
    Legacy(Address),
    /// Legacy-looking text that does not decode to 20 bytes. Kept verbatim.
    Unresolved(String),
}

impl CardAddress {
    /// Normalizes the address part of a card payload.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        if text.is_empty() {
            return Err(CodecError::EmptyPart("address"));
        }

        if text.starts_with("0x") || text.starts_with("0X") {
            return text.parse().map(CardAddress::Canonical);
        }

        if text.contains(|c: char| matches!(c, '=' | '+' | '/')) {
            return Ok(match STANDARD.decode(text) {
                Ok(bytes) if bytes.len() == ADDRESS_LENGTH => {
                    let mut raw = [0u8; ADDRESS_LENGTH];
                    raw.copy_from_slice(&bytes);
                    CardAddress::Legacy(Address(raw))
                }
                _ => {
                    warn!(address = text, "legacy card address does not convert, keeping it verbatim");
                    CardAddress::Unresolved(text.to_string())
                }
            });
        }

        text_to_bytes::<ADDRESS_LENGTH>(text)
            .map(|raw| CardAddress::Canonical(Address(raw)))
            .map_err(|e| CodecError::MalformedAddress(format!("{text}: {e}")))
    }

    /// The canonical address, if this one resolves to one.
    pub fn address(&self) -> Option<Address> {
        match self {
            CardAddress::Canonical(a) | CardAddress::Legacy(a) => Some(*a),
            CardAddress::Unresolved(_) => None,
        }
    }

    /// Whether this address was read from a legacy-format card.
    pub fn is_legacy(&self) -> bool {
        !matches!(self, CardAddress::Canonical(_))
    }

    /// Text written into a card payload. Resolvable addresses are always
    /// written in the current card-alphabet form.
    pub fn payload_text(&self) -> String {
        match self {
            CardAddress::Canonical(a) | CardAddress::Legacy(a) => a.to_card_text(),
            CardAddress::Unresolved(raw) => raw.clone(),
        }
    }
}

impl From<Address> for CardAddress {
    fn from(address: Address) -> Self {
        CardAddress::Canonical(address)
    }
}

impl fmt::Display for CardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardAddress::Canonical(a) | CardAddress::Legacy(a) => a.fmt(f),
            CardAddress::Unresolved(raw) => f.write_str(raw),
        }
    }
}
