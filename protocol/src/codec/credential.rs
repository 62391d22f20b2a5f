//! The card credential and its text form.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::config::{FRAGMENT_MARKER, PAYLOAD_PARTS, PAYLOAD_SEPARATOR};

use super::address::CardAddress;
use super::alphabet::{id_to_text, text_to_id};
use super::CodecError;

// ---------------------------------------------------------------------------
// CardCredential
// ---------------------------------------------------------------------------

/// What a card carries: its id, its address, and its sealed private key.
///
/// Immutable once built. The only ways to get one are [`decode`] and
/// [`CardCredentialBuilder::build`], both of which reject incomplete input.
#[derive(Clone, PartialEq, Eq)]
pub struct CardCredential {
    id: u64,
    address: CardAddress,
    encrypted_key: Vec<u8>,
    design_ref: Option<String>,
}

impl CardCredential {
    /// Starts a builder.
    pub fn builder() -> CardCredentialBuilder {
        CardCredentialBuilder::default()
    }

    /// Numeric card id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The card address as it was found.
    pub fn address(&self) -> &CardAddress {
        &self.address
    }

    /// Sealed private key blob.
    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    /// Catalogue design reference, when one was attached at build time.
    pub fn design_ref(&self) -> Option<&str> {
        self.design_ref.as_deref()
    }

    /// The compact `address:key:id` payload.
    pub fn to_payload(&self) -> String {
        encode(&self.address, &self.encrypted_key, self.id)
    }

    /// Redacted-at-rest form used by the session snapshot.
    pub fn to_persisted(&self) -> PersistedCredential {
        PersistedCredential {
            id: self.id,
            address: self.address.to_string(),
            encrypted_key_base64: STANDARD.encode(&self.encrypted_key),
        }
    }

    /// Rebuilds a credential from its persisted form.
    pub fn from_persisted(persisted: &PersistedCredential) -> Result<Self, CodecError> {
        let encrypted_key = STANDARD
            .decode(&persisted.encrypted_key_base64)
            .map_err(|_| CodecError::MalformedKey)?;
        Self::builder()
            .id(persisted.id)
            .address(CardAddress::parse(&persisted.address)?)
            .encrypted_key(encrypted_key)
            .build()
    }
}

impl fmt::Debug for CardCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardCredential")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("encrypted_key_len", &self.encrypted_key.len())
            .field("design_ref", &self.design_ref)
            .finish()
    }
}

/// JSON shape of a credential inside the session snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCredential {
    pub id: u64,
    pub address: String,
    pub encrypted_key_base64: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`CardCredential`] from named parts.
#[derive(Default)]
pub struct CardCredentialBuilder {
    id: Option<u64>,
    address: Option<CardAddress>,
    encrypted_key: Option<Vec<u8>>,
    design_ref: Option<String>,
}

impl CardCredentialBuilder {
    pub fn id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn address(mut self, address: impl Into<CardAddress>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn encrypted_key(mut self, blob: Vec<u8>) -> Self {
        self.encrypted_key = Some(blob);
        self
    }

    pub fn design_ref(mut self, design_ref: impl Into<String>) -> Self {
        self.design_ref = Some(design_ref.into());
        self
    }

    /// Fails on any missing required field, a zero id, or an empty key.
    pub fn build(self) -> Result<CardCredential, CodecError> {
        let id = self.id.ok_or(CodecError::MissingField("id"))?;
        if id == 0 {
            return Err(CodecError::ZeroId);
        }
        let address = self.address.ok_or(CodecError::MissingField("address"))?;
        let encrypted_key = self
            .encrypted_key
            .filter(|k| !k.is_empty())
            .ok_or(CodecError::MissingField("encryptedKey"))?;

        Ok(CardCredential {
            id,
            address,
            encrypted_key,
            design_ref: self.design_ref,
        })
    }
}

// ---------------------------------------------------------------------------
// Encode / Decode
// ---------------------------------------------------------------------------

/// Joins the three payload parts: card-alphabet address, base64 key,
/// card-alphabet id.
pub fn encode(address: &CardAddress, encrypted_key: &[u8], id: u64) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        address.payload_text(),
        STANDARD.encode(encrypted_key),
        id_to_text(id),
        sep = PAYLOAD_SEPARATOR
    )
}

/// Shareable link: `base_url` followed by the fragment marker and payload.
pub fn encode_card_url(base_url: &str, credential: &CardCredential) -> String {
    format!(
        "{}/{}{}",
        base_url.trim_end_matches('/'),
        FRAGMENT_MARKER,
        credential.to_payload()
    )
}

/// Parses a bare payload or anything that ends in `#payload`.
pub fn decode(input: &str) -> Result<CardCredential, CodecError> {
    let payload = input
        .split_once(FRAGMENT_MARKER)
        .map_or(input, |(_, fragment)| fragment)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0');

    let parts: Vec<&str> = payload.split(PAYLOAD_SEPARATOR).collect();
    if parts.len() != PAYLOAD_PARTS {
        return Err(CodecError::WrongPartCount {
            expected: PAYLOAD_PARTS,
            found: parts.len(),
        });
    }
    let (address_part, key_part, id_part) = (parts[0], parts[1], parts[2]);
    for (name, part) in [("address", address_part), ("key", key_part), ("id", id_part)] {
        if part.is_empty() {
            return Err(CodecError::EmptyPart(name));
        }
    }

    let id = text_to_id(id_part)?;
    let encrypted_key = STANDARD
        .decode(key_part)
        .map_err(|_| CodecError::MalformedKey)?;
    let address = CardAddress::parse(address_part)?;

    CardCredential::builder()
        .id(id)
        .address(address)
        .encrypted_key(encrypted_key)
        .build()
}

/// Alias of [`decode`] for callers holding a full link.
pub fn decode_card_url(url: &str) -> Result<CardCredential, CodecError> {
    decode(url)
}
