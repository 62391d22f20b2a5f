//! Decimal ether amounts to and from integer wei.
//!
//! All monetary values are `u128` wei. No floating point anywhere near
//! them; text is parsed digit by digit.

use thiserror::Error;

use crate::config::NATIVE_DECIMALS;

/// Why a decimal amount was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount may only contain digits and one '.'")]
    InvalidCharacter,

    #[error("amount has more than {0} decimal places")]
    TooManyDecimals(u32),

    #[error("amount is too large")]
    Overflow,
}

/// Parses a non-negative decimal with at most `decimals` fractional digits
/// into base units. No sign, no exponent, no thousands separators.
pub fn parse_units(text: &str, decimals: u32) -> Result<u128, AmountError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AmountError::Empty);
    }
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(AmountError::InvalidCharacter);
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(AmountError::InvalidCharacter);
    }
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooManyDecimals(decimals));
    }

    let scale = 10u128.checked_pow(decimals).ok_or(AmountError::Overflow)?;
    let mut value: u128 = 0;
    for b in whole.bytes() {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u128::from(b - b'0')))
            .ok_or(AmountError::Overflow)?;
    }
    value = value.checked_mul(scale).ok_or(AmountError::Overflow)?;

    let mut frac_value: u128 = 0;
    for b in fraction.bytes() {
        frac_value = frac_value * 10 + u128::from(b - b'0');
    }
    let padding = decimals - fraction.len() as u32;
    frac_value *= 10u128.pow(padding);

    value.checked_add(frac_value).ok_or(AmountError::Overflow)
}

/// Formats base units as a trimmed decimal: no trailing zeros, no trailing dot.
pub fn format_units(value: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let fraction = value % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0width$}", width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// `"1.5"` ether to wei.
pub fn parse_ether(text: &str) -> Result<u128, AmountError> {
    parse_units(text, NATIVE_DECIMALS)
}

/// Wei to a trimmed ether string.
pub fn format_ether(wei: u128) -> String {
    format_units(wei, NATIVE_DECIMALS)
}
