//! Reconciliation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe reconcile counters, shared by `Arc`.
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    /// Ledger reads issued by reconcile leaders
    fetches: AtomicU64,
    /// Callers that joined an in-flight reconcile
    deduplicated: AtomicU64,
    /// Reconciles that wrote a cache row
    applied: AtomicU64,
    /// Reconciles that left the cache untouched
    noops: AtomicU64,
    /// Of the no-ops, how many hit the caller's timeout
    timeouts: AtomicU64,
    /// Curve or invariant discrepancies flagged
    discrepancies: AtomicU64,
}

/// Point-in-time copy of [`ReconcileMetrics`].
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileMetricsSnapshot {
    pub fetches: u64,
    pub deduplicated: u64,
    pub applied: u64,
    pub noops: u64,
    pub timeouts: u64,
    pub discrepancies: u64,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_noop(&self, timed_out: bool) {
        self.noops.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_discrepancies(&self, count: usize) {
        self.discrepancies.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReconcileMetricsSnapshot {
        ReconcileMetricsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            noops: self.noops.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discrepancies: self.discrepancies.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition of every counter.
    pub fn to_prometheus_text(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("pool_reconcile_fetches_total", "Ledger reads issued by reconcile", s.fetches),
            (
                "pool_reconcile_deduplicated_total",
                "Reconcile calls that joined an in-flight run",
                s.deduplicated,
            ),
            ("pool_reconcile_applied_total", "Reconciles that wrote the cache", s.applied),
            ("pool_reconcile_noops_total", "Reconciles that wrote nothing", s.noops),
            ("pool_reconcile_timeouts_total", "Reconciles that timed out", s.timeouts),
            (
                "pool_reconcile_discrepancies_total",
                "Curve or invariant discrepancies flagged",
                s.discrepancies,
            ),
        ];

        let mut output = String::with_capacity(1024);
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n\
                 # TYPE {name} counter\n\
                 {name} {value}\n"
            ));
        }
        output
    }
}
