//! Log-safe rendering of secret material.

use crate::config::REDACT_VISIBLE_CHARS;

/// Keeps a short prefix and suffix of `secret` and elides the rest.
///
/// Strings too short to keep both ends without revealing most of the value
/// are fully masked.
///
/// ```
/// use cardvault_protocol::crypto::redact;
///
/// assert_eq!(redact("4c0883a69102937d6231471b5dbb6204"), "4c08…6204");
/// assert_eq!(redact("abc"), "***");
/// ```
pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= REDACT_VISIBLE_CHARS * 2 + 1 {
        return "*".repeat(chars.len().max(3));
    }
    let head: String = chars[..REDACT_VISIBLE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - REDACT_VISIBLE_CHARS..].iter().collect();
    format!("{head}…{tail}")
}

/// [`redact`] over raw bytes, rendered as hex first.
pub fn redact_bytes(secret: &[u8]) -> String {
    redact(&hex::encode(secret))
}
