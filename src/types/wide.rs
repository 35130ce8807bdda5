//! The numeric decode boundary.
//!
//! Ledger numbers arrive as decimal strings, `0x` hex strings, or (for
//! small values) bare JSON integers. [`decode_wide`] is the only place that
//! turns them into [`U256`]; floats and negatives are rejected rather than
//! coerced.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

/// A wire-level numeric field, before decoding.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum WideValue {
    Unsigned(u64),
    Text(String),
    Other(serde_json::Value),
}

impl From<u64> for WideValue {
    fn from(v: u64) -> Self {
        WideValue::Unsigned(v)
    }
}

impl From<&str> for WideValue {
    fn from(v: &str) -> Self {
        WideValue::Text(v.to_string())
    }
}

impl From<U256> for WideValue {
    fn from(v: U256) -> Self {
        WideValue::Text(v.to_string())
    }
}

impl From<u128> for WideValue {
    fn from(v: u128) -> Self {
        WideValue::Text(v.to_string())
    }
}

/// Decode a wire number losslessly into a 256-bit unsigned integer.
pub fn decode_wide(field: &'static str, raw: &WideValue) -> Result<U256, ParseError> {
    match raw {
        WideValue::Unsigned(v) => Ok(U256::from(*v)),
        WideValue::Text(text) => parse_text(field, text),
        WideValue::Other(value) => {
            let negative = value.as_i64().is_some_and(|v| v < 0)
                || value.as_f64().is_some_and(|v| v < 0.0);
            if negative {
                Err(ParseError::Negative {
                    field,
                    value: value.to_string(),
                })
            } else {
                Err(ParseError::InvalidInteger {
                    field,
                    value: value.to_string(),
                })
            }
        }
    }
}

fn parse_text(field: &'static str, text: &str) -> Result<U256, ParseError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(ParseError::Empty { field });
    }
    if s.starts_with('-') {
        return Err(ParseError::Negative {
            field,
            value: s.to_string(),
        });
    }

    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16u64),
        None => (s, 10u64),
    };
    let valid = !digits.is_empty()
        && digits.chars().all(|c| {
            if radix == 16 {
                c.is_ascii_hexdigit()
            } else {
                c.is_ascii_digit()
            }
        });
    if !valid {
        return Err(ParseError::InvalidInteger {
            field,
            value: s.to_string(),
        });
    }

    // Digits are pre-validated, so the only remaining failure is width.
    U256::from_str_radix(digits, radix).map_err(|_| ParseError::Overflow { field, bits: 256 })
}

/// Narrow a decoded value to `u128`.
pub fn narrow_u128(field: &'static str, value: U256) -> Result<u128, ParseError> {
    u128::try_from(value).map_err(|_| ParseError::Overflow { field, bits: 128 })
}

/// Narrow a decoded value to `u32`.
pub fn narrow_u32(field: &'static str, value: U256) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::Overflow { field, bits: 32 })
}

/// Narrow a decoded value to a non-negative `i64` (unix seconds).
pub fn narrow_i64(field: &'static str, value: U256) -> Result<i64, ParseError> {
    i64::try_from(value).map_err(|_| ParseError::Overflow { field, bits: 63 })
}

/// Lossy conversion for display. Never used on the exact path.
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}
