//! Authoritative ledger access.
//!
//! - [`ledger_client`]: wire requests and the [`LedgerSource`] seam
//! - [`response_structs`]: raw responses and the single decode boundary
//! - [`reader`]: typed, timeout-bounded single and batched reads

pub mod ledger_client;
pub mod reader;
pub mod response_structs;

pub use ledger_client::{LedgerClient, LedgerRequest, LedgerSource};
pub use reader::{LedgerReader, DEFAULT_MAX_CONCURRENT_FETCHES};
pub use response_structs::PoolStateResponse;
