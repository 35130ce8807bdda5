//! Square-root fixed-point price codec (Q64.96).
//!
//! The ledger stores each side's price as `sqrt(price_micro) * 2^96`, where
//! `price_micro` is micro-currency per whole token. Squaring a value below
//! 2^128 never leaves 256 bits, so decode is exact in [`U256`] and
//! reproduces the ledger bit-for-bit. Floats appear only in the display
//! helpers at the edges.

use alloy::primitives::U256;

use super::isqrt;
use crate::consts::{CURRENCY_SCALE, Q96_SHIFT};
use crate::types::u256_to_f64;

/// 2^96
pub const Q96: U256 = U256::from_limbs([0, 1 << 32, 0, 0]);

/// Largest price (micro units) that can be encoded: `price << 192` must fit.
pub const MAX_ENCODABLE_PRICE_MICRO: u128 = u64::MAX as u128;

/// Decode a sqrt price to integer micro-currency per whole token.
///
/// Returns `None` for a zero (unset) sqrt price so callers pick the
/// side-specific fallback explicitly.
///
/// Panics if `sqrt_price_x96` is wider than 128 bits; the ledger decode
/// boundary rejects such values before they get here.
pub fn decode_price_micro(sqrt_price_x96: U256) -> Option<U256> {
    if sqrt_price_x96.is_zero() {
        return None;
    }
    assert!(
        sqrt_price_x96.bit_len() <= 128,
        "sqrt price wider than 128 bits: {sqrt_price_x96}"
    );
    let squared = sqrt_price_x96 * sqrt_price_x96;
    // Two shifts by the Q96 exponent rather than one by 192.
    let price_q96 = squared >> Q96_SHIFT;
    Some(price_q96 >> Q96_SHIFT)
}

/// Decode, substituting `fallback_micro` for an unset sqrt price.
pub fn decode_price_micro_or(sqrt_price_x96: U256, fallback_micro: u128) -> U256 {
    decode_price_micro(sqrt_price_x96).unwrap_or_else(|| U256::from(fallback_micro))
}

/// Encode integer micro-currency per whole token as a Q96 sqrt price.
///
/// Panics above [`MAX_ENCODABLE_PRICE_MICRO`].
pub fn encode_price_micro(price_micro: U256) -> U256 {
    assert!(
        price_micro <= U256::from(MAX_ENCODABLE_PRICE_MICRO),
        "price {price_micro} exceeds encodable range"
    );
    isqrt(price_micro << (2 * Q96_SHIFT))
}

/// Human-scale price (currency per token) from a sqrt price.
pub fn decode_price(sqrt_price_x96: U256, fallback_micro: u128) -> f64 {
    micro_to_display(decode_price_micro_or(sqrt_price_x96, fallback_micro))
}

/// Encode a human-scale price. The float is only used to reach integer
/// micro units; the square root itself is exact.
///
/// Panics on negative, NaN or infinite input.
pub fn encode_price(price: f64) -> U256 {
    assert!(
        price.is_finite() && price >= 0.0,
        "price must be finite and non-negative, got {price}"
    );
    let micro = (price * CURRENCY_SCALE as f64).floor();
    assert!(
        micro <= MAX_ENCODABLE_PRICE_MICRO as f64,
        "price {price} exceeds encodable range"
    );
    encode_price_micro(U256::from(micro as u128))
}

/// Micro units to display units.
pub fn micro_to_display(micro: U256) -> f64 {
    u256_to_f64(micro) / CURRENCY_SCALE as f64
}
