//! Shared pool, cache and wire-number types.
//!
//! Ledger responses are decoded once, in [`wide`], into the strongly typed
//! [`PoolSnapshot`]; everything downstream (curve math, decay, settlement,
//! reconciliation) works on these types only.

mod cache;
mod pool;
mod wide;

pub use cache::*;
pub use pool::*;
pub use wide::*;
