//! Ledger-to-cache reconciliation.
//!
//! - **store**: `CacheStore` and its in-memory and JSON-file backends
//! - **single_flight**: per-pool deduplication of in-flight work
//! - **reconciler**: fetch, merge and flag, under a caller timeout
//! - **metrics**: counters for all of the above

mod metrics;
mod reconciler;
mod single_flight;
mod store;

pub use metrics::{ReconcileMetrics, ReconcileMetricsSnapshot};
pub use reconciler::{Discrepancy, ReconcileOutcome, ReconcileStatus, Reconciler};
pub use single_flight::{Flight, SingleFlight};
pub use store::{CacheStore, InMemoryCache, JsonFileCache};
