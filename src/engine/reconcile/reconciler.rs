use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{CacheStore, ReconcileMetrics, SingleFlight};
use crate::consts::BPS_DENOMINATOR;
use crate::engine::math::{decode_price_micro, CoupledCurve};
use crate::engine::reserve::ReserveModel;
use crate::ledger::LedgerReader;
use crate::prelude::*;
use crate::types::{
    AppliedFields, CachePatch, CacheRecord, CurveParams, CurveWriteMode, PoolId, PoolSnapshot,
    Side,
};
use crate::Error;

/// Something about a reconciled pool worth a human look. Ledger values are
/// written regardless.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Discrepancy {
    /// Pool is not on the F = 1, β = 1/2 surface.
    #[serde(rename_all = "camelCase")]
    NonCanonicalCurve { params: CurveParams },
    /// Ledger sqrt price and the curve price at the ledger's supplies differ.
    #[serde(rename_all = "camelCase")]
    PriceDivergence {
        side: Side,
        ledger_micro: U256,
        curve_micro: U256,
        divergence_bps: u128,
    },
    /// Vault or reserve invariant violated on the ledger.
    #[serde(rename_all = "camelCase")]
    Inconsistent { detail: String },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReconcileStatus {
    Applied,
    /// Cache left exactly as it was.
    #[serde(rename_all = "camelCase")]
    NoOp { reason: String, timed_out: bool },
}

/// What one reconcile did. Shared verbatim with deduplicated callers.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub pool_id: PoolId,
    pub status: ReconcileStatus,
    pub applied: AppliedFields,
    pub flags: Vec<Discrepancy>,
    /// The row after the reconcile, when one was written.
    pub record: Option<CacheRecord>,
    /// Whether this caller joined another caller's reconcile.
    pub shared: bool,
}

impl ReconcileOutcome {
    fn noop(pool_id: PoolId, error: &Error) -> Self {
        Self {
            pool_id,
            status: ReconcileStatus::NoOp {
                reason: error.to_string(),
                timed_out: matches!(error, Error::Timeout { .. }),
            },
            applied: AppliedFields::default(),
            flags: Vec::new(),
            record: None,
            shared: false,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == ReconcileStatus::Applied
    }
}

/// Merges authoritative ledger state into the cache.
///
/// One reconcile per pool runs at a time; concurrent requests for the same
/// pool wait for it and receive its outcome.
#[derive(Clone)]
pub struct Reconciler {
    reader: LedgerReader,
    store: Arc<dyn CacheStore>,
    flights: Arc<SingleFlight<PoolId, ReconcileOutcome>>,
    metrics: Arc<ReconcileMetrics>,
    price_tolerance_bps: u32,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("reader", &self.reader)
            .field("in_flight", &self.flights.in_flight())
            .field("price_tolerance_bps", &self.price_tolerance_bps)
            .finish()
    }
}

impl Reconciler {
    pub fn new(reader: LedgerReader, store: Arc<dyn CacheStore>) -> Self {
        Self {
            reader,
            store,
            flights: Arc::new(SingleFlight::new()),
            metrics: Arc::new(ReconcileMetrics::new()),
            price_tolerance_bps: 50,
        }
    }

    pub fn with_price_tolerance_bps(mut self, bps: u32) -> Self {
        self.price_tolerance_bps = bps;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ReconcileMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn reader(&self) -> &LedgerReader {
        &self.reader
    }

    /// Whether a reconcile for `pool_id` is running right now.
    pub fn is_in_flight(&self, pool_id: &PoolId) -> bool {
        self.flights.is_in_flight(pool_id)
    }

    /// Fetch `pool_id` from the ledger and merge it, all within `budget`.
    pub async fn sync(&self, pool_id: PoolId, budget: Duration) -> ReconcileOutcome {
        let this = self.clone();
        self.single_flight(pool_id, budget, async move {
            this.metrics.record_fetch();
            let snapshot = this.reader.fetch(pool_id, budget).await?;
            this.apply(snapshot, CurveWriteMode::Backfill).await
        })
        .await
    }

    /// Merge an already-read snapshot, within `budget`.
    ///
    /// A caller that lands while another reconcile of the same pool is in
    /// flight receives that reconcile's outcome; its own snapshot is not
    /// applied separately.
    pub async fn reconcile(&self, snapshot: PoolSnapshot, budget: Duration) -> ReconcileOutcome {
        let this = self.clone();
        let pool_id = snapshot.pool_id;
        self.single_flight(pool_id, budget, async move {
            this.apply(snapshot, CurveWriteMode::Backfill).await
        })
        .await
    }

    /// Repair path: re-read the pool and overwrite every field the ledger
    /// reports, curve parameters included. Errors are returned in full.
    pub async fn force_resync(
        &self,
        pool_id: PoolId,
        budget: Duration,
    ) -> Result<ReconcileOutcome> {
        let work = async {
            self.metrics.record_fetch();
            let snapshot = self.reader.fetch(pool_id, budget).await?;
            self.apply(snapshot, CurveWriteMode::Overwrite).await
        };
        let outcome = timeout(budget, work)
            .await
            .map_err(|_| Error::timeout("force resync", budget))??;
        info!(
            pool = %pool_id,
            changed = outcome.applied.changed.len(),
            flags = outcome.flags.len(),
            "Force resync applied"
        );
        Ok(outcome)
    }

    async fn single_flight(
        &self,
        pool_id: PoolId,
        budget: Duration,
        work: impl std::future::Future<Output = Result<ReconcileOutcome>> + Send + 'static,
    ) -> ReconcileOutcome {
        let metrics = Arc::clone(&self.metrics);
        let flight = self
            .flights
            .run(pool_id, move || async move {
                let result = match timeout(budget, work).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout("reconcile", budget)),
                };
                match result {
                    Ok(outcome) => {
                        metrics.record_applied();
                        outcome
                    }
                    Err(e) => {
                        let timed_out = matches!(e, Error::Timeout { .. });
                        metrics.record_noop(timed_out);
                        if matches!(e, Error::NotFound { .. }) {
                            debug!(pool = %pool_id, "Pool not on ledger, cache untouched");
                        } else if e.is_unavailable() {
                            warn!(
                                pool = %pool_id,
                                error = %e,
                                "Ledger unavailable, cache untouched"
                            );
                        } else {
                            error!(
                                pool = %pool_id,
                                error = %e,
                                "Reconcile rejected, cache untouched"
                            );
                        }
                        ReconcileOutcome::noop(pool_id, &e)
                    }
                }
            })
            .await;

        if flight.shared {
            self.metrics.record_deduplicated();
        }
        let mut outcome = flight.value.unwrap_or_else(|| {
            ReconcileOutcome::noop(pool_id, &Error::cache("reconcile task aborted"))
        });
        outcome.shared = flight.shared;
        outcome
    }

    async fn apply(
        &self,
        snapshot: PoolSnapshot,
        mode: CurveWriteMode,
    ) -> Result<ReconcileOutcome> {
        let pool_id = snapshot.pool_id;
        let patch = CachePatch::from_snapshot(snapshot, mode);
        let (applied, record) = self.store.upsert(&patch).await?;

        let flags = self.inspect(&record);
        if !flags.is_empty() {
            self.metrics.record_discrepancies(flags.len());
        }
        debug!(
            pool = %pool_id,
            written = applied.written.len(),
            changed = applied.changed.len(),
            "Reconciled pool"
        );

        Ok(ReconcileOutcome {
            pool_id,
            status: ReconcileStatus::Applied,
            applied,
            flags,
            record: Some(record),
            shared: false,
        })
    }

    /// Flag curve and invariant discrepancies on a freshly written row.
    fn inspect(&self, record: &CacheRecord) -> Vec<Discrepancy> {
        let snapshot = record.to_snapshot();
        let params = snapshot.curve_params();
        let mut flags = Vec::new();

        if params.validate().is_err() {
            flags.push(Discrepancy::Inconsistent {
                detail: format!("cached curve parameters are invalid: {params:?}"),
            });
            return flags;
        }
        if !params.is_canonical() {
            flags.push(Discrepancy::NonCanonicalCurve { params });
        }

        let curve = CoupledCurve::for_pool(&snapshot.pool_id, params);
        for side in [Side::Long, Side::Short] {
            let Some(ledger_micro) = decode_price_micro(snapshot.sqrt_price_x96(side)) else {
                continue;
            };
            let curve_micro = curve.price_micro(snapshot.supply_long, snapshot.supply_short, side);
            let gap = if ledger_micro > curve_micro {
                ledger_micro - curve_micro
            } else {
                curve_micro - ledger_micro
            };
            let base = curve_micro.max(U256::from(1u8));
            let divergence_bps =
                u128::try_from(gap * U256::from(BPS_DENOMINATOR) / base).unwrap_or(u128::MAX);
            if divergence_bps > u128::from(self.price_tolerance_bps) {
                warn!(
                    pool = %snapshot.pool_id,
                    %side,
                    ledger = %ledger_micro,
                    curve = %curve_micro,
                    divergence_bps,
                    "Ledger price diverges from curve"
                );
                flags.push(Discrepancy::PriceDivergence {
                    side,
                    ledger_micro,
                    curve_micro,
                    divergence_bps,
                });
            }
        }

        let report = ReserveModel::new(curve).audit(&snapshot);
        if let Err(Error::Inconsistent { detail, .. }) = report.into_result(snapshot.pool_id) {
            flags.push(Discrepancy::Inconsistent { detail });
        }
        flags
    }
}
