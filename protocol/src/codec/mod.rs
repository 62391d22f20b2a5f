//! # Credential Codec
//!
//! Lossless mapping between the text written on a card and the
//! [`CardCredential`] it describes.
//!
//! ## Payload Format
//!
//! ```text
//! https://cardvault.app/#5agx009xiu8rwZMc0qolZbA5FXD:AQAAAEwAAAAC...:7
//! └──────── origin ────┘ └──── address ────────────┘ └─ key ──┘ └ id
//! ```
//!
//! - **address** — card-alphabet numeral (current), `0x` hex, or legacy base64.
//! - **key** — the sealed private key, standard base64.
//! - **id** — card-alphabet numeral.
//!
//! ```text
//! alphabet.rs   — 64-symbol positional numerals for ids and addresses
//! address.rs    — Address, plus the CardAddress tagged union for old cards
//! credential.rs — CardCredential, its builder, encode/decode
//! ```

pub mod address;
pub mod alphabet;
pub mod credential;

pub use address::{Address, CardAddress};
pub use alphabet::{id_to_text, text_to_id};
pub use credential::{
    decode, decode_card_url, encode, encode_card_url, CardCredential, CardCredentialBuilder,
};

use thiserror::Error;

/// Reasons a card payload can be rejected.
///
/// None of these carry secret material: the key part of a payload is
/// ciphertext, and it is never echoed back in a message anyway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {expected} ':'-separated parts, found {found}")]
    WrongPartCount { expected: usize, found: usize },

    #[error("the {0} part of the card payload is empty")]
    EmptyPart(&'static str),

    #[error("unknown symbol {symbol:?} at position {position}")]
    UnknownSymbol { symbol: char, position: usize },

    #[error("card id does not fit in 64 bits")]
    IdOverflow,

    #[error("card id must be positive")]
    ZeroId,

    #[error("value does not fit in {max_bytes} bytes")]
    ValueTooWide { max_bytes: usize },

    #[error("encrypted key is not valid base64")]
    MalformedKey,

    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("credential is missing required field `{0}`")]
    MissingField(&'static str),
}
