//! Coupled LONG/SHORT pool engine.
//!
//! - **math**: fixed-point codec and the bonding surface itself
//! - **reserve**: relevance, reserve/price consistency and audits
//! - **decay**: read-only post-expiration projection
//! - **settlement**: epoch reserve rebalancing toward a realized score
//! - **reconcile**: ledger to cache sync with single-flight dedup
//! - **view**: human-scale pool views for presentation
//!
//! The ledger is the only source of truth for pool state. Nothing here
//! writes to it; the cache is written only through the reconciler.

pub mod config;
pub mod decay;
pub mod infra;
pub mod math;
pub mod reconcile;
pub mod reserve;
pub mod settlement;
pub mod view;

#[cfg(test)]
mod tests;

pub use config::*;
pub use decay::*;
pub use reconcile::*;
pub use reserve::*;
pub use settlement::*;
pub use view::*;
