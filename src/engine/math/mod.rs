//! Pure pricing math.
//!
//! - **fixed_point**: Q64.96 square-root price codec
//! - **curve**: the coupled L2-norm bonding surface and trade quotes
//!
//! Nothing in here suspends or performs I/O. Violated preconditions panic.

pub mod curve;
pub mod fixed_point;

pub use curve::*;
pub use fixed_point::*;

use alloy::primitives::U256;

/// Floor square root of a 256-bit integer (Newton's method).
pub fn isqrt(x: U256) -> U256 {
    if x.is_zero() {
        return U256::ZERO;
    }
    // ceil(x / 2) without the overflow of (x + 1) / 2
    let mut z = (x >> 1usize) + (x & U256::from(1u8));
    let mut y = x;
    while z < y {
        y = z;
        z = (x / z + z) >> 1usize;
    }
    y
}

/// `floor(sqrt(a * b))`, or `None` if `a * b` does not fit in 256 bits.
pub(crate) fn checked_sqrt_product(a: U256, b: U256) -> Option<U256> {
    a.checked_mul(b).map(isqrt)
}
