//! Presentation read path.
//!
//! Everything leaving this module is in human-scale decimal units. Missing
//! pools, ledger timeouts and cache failures all collapse to
//! [`PoolDisplay::Unavailable`]; the detail goes to the log, not the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::decay::DecayEngine;
use super::math::micro_to_display;
use super::reconcile::{CacheStore, Reconciler};
use super::reserve::{relevance, ReserveModel};
use crate::consts::{CURRENCY_SCALE, TOKEN_SCALE};
use crate::types::{CacheRecord, PoolId, PoolPhase, Side};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub pool_id: PoolId,
    pub phase: PoolPhase,
    pub price_long: f64,
    pub price_short: f64,
    pub supply_long: f64,
    pub supply_short: f64,
    pub relevance: f64,
    pub market_cap: f64,
    pub vault_balance_display: f64,
    pub decay_pending: bool,
    pub last_synced_at: Option<i64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PoolDisplay {
    Available(PoolView),
    Unavailable,
}

impl PoolDisplay {
    pub fn view(&self) -> Option<&PoolView> {
        match self {
            PoolDisplay::Available(view) => Some(view),
            PoolDisplay::Unavailable => None,
        }
    }
}

fn tokens(atomic: u128) -> f64 {
    atomic as f64 / TOKEN_SCALE as f64
}

fn currency(micro: u128) -> f64 {
    micro as f64 / CURRENCY_SCALE as f64
}

/// Cache-backed pool views with decay applied at read time.
#[derive(Debug, Clone)]
pub struct PoolViewService {
    store: Arc<dyn CacheStore>,
    decay: DecayEngine,
    reconciler: Option<Reconciler>,
    sync_budget: Duration,
}

impl PoolViewService {
    pub fn new(store: Arc<dyn CacheStore>, decay: DecayEngine) -> Self {
        Self {
            store,
            decay,
            reconciler: None,
            sync_budget: Duration::from_secs(2),
        }
    }

    /// On a cache miss, sync the pool through `reconciler` within `budget`.
    pub fn with_read_through(mut self, reconciler: Reconciler, budget: Duration) -> Self {
        self.reconciler = Some(reconciler);
        self.sync_budget = budget;
        self
    }

    pub async fn view(&self, pool_id: PoolId, now: i64) -> PoolDisplay {
        let record = match self.store.get(pool_id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => None,
            Err(e) => {
                warn!(pool = %pool_id, error = %e, "Cache read failed");
                None
            }
        };
        let record = match record {
            Some(record) => record,
            None => match &self.reconciler {
                Some(reconciler) => {
                    let outcome = reconciler.sync(pool_id, self.sync_budget).await;
                    match outcome.record {
                        Some(record) => record,
                        None => return PoolDisplay::Unavailable,
                    }
                }
                None => {
                    debug!(pool = %pool_id, "Pool not cached");
                    return PoolDisplay::Unavailable;
                }
            },
        };
        self.render(&record, now).await
    }

    pub async fn view_many(&self, pool_ids: &[PoolId], now: i64) -> Vec<(PoolId, PoolDisplay)> {
        let views = pool_ids.iter().map(|id| async move { (*id, self.view(*id, now).await) });
        futures_util::future::join_all(views).await
    }

    async fn render(&self, record: &CacheRecord, now: i64) -> PoolDisplay {
        let snapshot = record.to_snapshot();
        if let Err(e) = snapshot.curve_params().validate() {
            warn!(pool = %record.pool_id, error = %e, "Cached curve parameters unusable");
            return PoolDisplay::Unavailable;
        }
        let model = ReserveModel::for_snapshot(&snapshot);
        let projection = self.decay.project(&snapshot, now).await;

        PoolDisplay::Available(PoolView {
            pool_id: record.pool_id,
            phase: snapshot.phase(),
            price_long: micro_to_display(model.side_price_micro(&snapshot, Side::Long)),
            price_short: micro_to_display(model.side_price_micro(&snapshot, Side::Short)),
            supply_long: tokens(snapshot.supply_long),
            supply_short: tokens(snapshot.supply_short),
            relevance: relevance(projection.reserve_long, projection.reserve_short),
            market_cap: currency(projection.reserve_long.saturating_add(projection.reserve_short)),
            vault_balance_display: currency(snapshot.vault_balance),
            decay_pending: projection.decay_pending,
            last_synced_at: record.last_synced_at,
        })
    }
}
