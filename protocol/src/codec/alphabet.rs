//! Positional numerals over the 64-symbol card alphabet.
//!
//! Card ids are plain `u64` values written most-significant symbol first.
//! Addresses use the same numerals over a 160-bit big-endian integer, so a
//! 20-byte address fits in at most 27 symbols instead of 42 hex characters.
//! Because 64 is a power of two, byte strings convert with shifts rather than
//! big-number division.

use crate::config::{ALPHABET_BITS_PER_SYMBOL, CARD_ALPHABET};

use super::CodecError;

const BASE: u64 = 1 << ALPHABET_BITS_PER_SYMBOL;
const SYMBOL_MASK: u32 = (1 << ALPHABET_BITS_PER_SYMBOL) - 1;

/// Digit value of an alphabet symbol, or `None` for anything else.
pub fn symbol_value(c: char) -> Option<u8> {
    let v = match c {
        '0'..='9' => c as u8 - b'0',
        'a'..='z' => c as u8 - b'a' + 10,
        'A'..='Z' => c as u8 - b'A' + 36,
        '_' => 62,
        '-' => 63,
        _ => return None,
    };
    Some(v)
}

fn symbol(value: u32) -> char {
    CARD_ALPHABET.as_bytes()[(value & SYMBOL_MASK) as usize] as char
}

/// Returns `true` if every character of `text` is an alphabet symbol.
pub fn is_alphabet_text(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| symbol_value(c).is_some())
}

/// Writes `n` in the card alphabet. Zero is `"0"`; no other value has a
/// leading `0`.
pub fn id_to_text(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(11);
    while n > 0 {
        digits.push(symbol((n % BASE) as u32));
        n /= BASE;
    }
    digits.iter().rev().collect()
}

/// Parses card-alphabet text back into an integer.
///
/// Rejects empty input, symbols outside the alphabet, and values that do
/// not fit in a `u64`.
pub fn text_to_id(text: &str) -> Result<u64, CodecError> {
    if text.is_empty() {
        return Err(CodecError::EmptyPart("id"));
    }
    let mut n: u64 = 0;
    for (position, c) in text.chars().enumerate() {
        let digit = symbol_value(c).ok_or(CodecError::UnknownSymbol { symbol: c, position })?;
        n = n
            .checked_mul(BASE)
            .and_then(|n| n.checked_add(u64::from(digit)))
            .ok_or(CodecError::IdOverflow)?;
    }
    Ok(n)
}

/// Writes a big-endian byte string as a card-alphabet numeral.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    let mut symbols = Vec::with_capacity(bytes.len() * 8 / 6 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0u32;

    for &b in bytes.iter().rev() {
        acc |= u32::from(b) << bits;
        bits += 8;
        while bits >= ALPHABET_BITS_PER_SYMBOL {
            symbols.push(symbol(acc));
            acc >>= ALPHABET_BITS_PER_SYMBOL;
            bits -= ALPHABET_BITS_PER_SYMBOL;
        }
    }
    if bits > 0 {
        symbols.push(symbol(acc));
    }

    while symbols.len() > 1 && symbols.last() == Some(&'0') {
        symbols.pop();
    }
    if symbols.is_empty() {
        symbols.push('0');
    }
    symbols.iter().rev().collect()
}

/// Parses a card-alphabet numeral into exactly `N` big-endian bytes,
/// left-padding with zeros.
///
/// Values wider than `N` bytes are rejected with [`CodecError::ValueTooWide`].
pub fn text_to_bytes<const N: usize>(text: &str) -> Result<[u8; N], CodecError> {
    if text.is_empty() {
        return Err(CodecError::EmptyPart("address"));
    }

    let char_count = text.chars().count();
    let mut out = [0u8; N];
    let mut written = 0usize;
    let mut acc: u32 = 0;
    let mut bits = 0u32;

    let mut push = |byte: u8, written: &mut usize| -> Result<(), CodecError> {
        if *written < N {
            out[N - 1 - *written] = byte;
            *written += 1;
            Ok(())
        } else if byte != 0 {
            Err(CodecError::ValueTooWide { max_bytes: N })
        } else {
            Ok(())
        }
    };

    for (rev_index, c) in text.chars().rev().enumerate() {
        let digit = symbol_value(c).ok_or(CodecError::UnknownSymbol {
            symbol: c,
            position: char_count - 1 - rev_index,
        })?;
        acc |= u32::from(digit) << bits;
        bits += ALPHABET_BITS_PER_SYMBOL;
        while bits >= 8 {
            push((acc & 0xff) as u8, &mut written)?;
            acc >>= 8;
            bits -= 8;
        }
    }
    if acc != 0 {
        push(acc as u8, &mut written)?;
    }

    Ok(out)
}
