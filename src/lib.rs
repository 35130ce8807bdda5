#![deny(unreachable_pub)]

//! Pricing and reconciliation engine for coupled LONG/SHORT bonding-surface
//! pools.
//!
//! Pool state lives on an external ledger. This crate reads it, prices
//! trades on the bonding surface, projects decay and settlement, and keeps
//! a local read cache consistent with the ledger.

// Core modules
mod consts;
mod errors;
mod helpers;
mod prelude;
mod req;

// Shared types and wire helpers
pub mod serde_utils;
pub mod types;

// Feature modules
pub mod engine;
pub mod ledger;

// Re-exports
pub use consts::*;
pub use errors::{Error, HttpErrorKind, ParseError};
pub use helpers::{unix_now, BaseUrl};
pub use ledger::{LedgerClient, LedgerReader, LedgerSource};
pub use req::HttpClient;
pub use types::*;
