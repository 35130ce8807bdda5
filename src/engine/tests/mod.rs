//! Engine tests against a scripted in-process ledger.

mod integration_tests;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::consts::TOKEN_SCALE;
use crate::engine::math::{encode_price_micro, CoupledCurve};
use crate::ledger::{LedgerSource, PoolStateResponse};
use crate::prelude::*;
use crate::types::{CurveFields, CurveParams, PoolId, PoolSnapshot, Side};
use crate::Error;

pub(super) const NOW: i64 = 1_700_000_000;

/// Pool whose reserves, sqrt prices and vault agree with the canonical
/// curve at the given atomic supplies.
pub(super) fn curve_pool(id: u8, supply_long: u128, supply_short: u128) -> PoolSnapshot {
    let curve = CoupledCurve::new(CurveParams::default());
    let pl = curve.price_micro(supply_long, supply_short, Side::Long);
    let ps = curve.price_micro(supply_long, supply_short, Side::Short);
    let one = U256::from(TOKEN_SCALE);
    let rl = u128::try_from(pl * U256::from(supply_long) / one).unwrap_or(u128::MAX);
    let rs = u128::try_from(ps * U256::from(supply_short) / one).unwrap_or(u128::MAX);
    PoolSnapshot {
        pool_id: PoolId::repeat_byte(id),
        supply_long,
        supply_short,
        reserve_long: rl,
        reserve_short: rs,
        sqrt_price_long_x96: encode_price_micro(pl),
        sqrt_price_short_x96: encode_price_micro(ps),
        curve: CurveFields::from_params(&CurveParams::default()),
        vault_balance: rl + rs,
        last_settle_ts: NOW - 7_200,
        min_settle_interval: 3_600,
        expiration_ts: None,
        last_decay_update: 0,
        observed_at: NOW,
    }
}

/// Scripted ledger with call counters and injectable latency and failures.
#[derive(Default)]
pub(super) struct MockLedger {
    pools: Mutex<HashMap<PoolId, PoolSnapshot>>,
    simulated: Mutex<HashMap<PoolId, PoolSnapshot>>,
    failing: Mutex<HashSet<PoolId>>,
    delay: Duration,
    batch: bool,
    truncate_batch: bool,
    simulation: bool,
    pub(super) single_calls: AtomicUsize,
    pub(super) batch_calls: AtomicUsize,
    pub(super) simulate_calls: AtomicUsize,
}

impl MockLedger {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(super) fn with_batch(mut self) -> Self {
        self.batch = true;
        self
    }

    /// Batch reads drop the last requested entry.
    pub(super) fn with_truncated_batch(mut self) -> Self {
        self.batch = true;
        self.truncate_batch = true;
        self
    }

    pub(super) fn with_simulation(mut self) -> Self {
        self.simulation = true;
        self
    }

    pub(super) fn put(&self, snapshot: PoolSnapshot) {
        self.pools.lock().unwrap().insert(snapshot.pool_id, snapshot);
    }

    pub(super) fn put_simulated(&self, snapshot: PoolSnapshot) {
        self.simulated
            .lock()
            .unwrap()
            .insert(snapshot.pool_id, snapshot);
    }

    pub(super) fn fail(&self, pool_id: PoolId) {
        self.failing.lock().unwrap().insert(pool_id);
    }

    pub(super) fn calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    fn respond(&self, pool_id: PoolId) -> Result<Option<PoolStateResponse>> {
        if self.failing.lock().unwrap().contains(&pool_id) {
            return Err(Error::server_error(503, "ledger unavailable".to_string()));
        }
        Ok(self
            .pools
            .lock()
            .unwrap()
            .get(&pool_id)
            .map(PoolStateResponse::from_snapshot))
    }

    async fn latency(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl LedgerSource for MockLedger {
    async fn pool_state(&self, pool_id: PoolId) -> Result<Option<PoolStateResponse>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.latency().await;
        self.respond(pool_id)
    }

    async fn pool_states(&self, pool_ids: &[PoolId]) -> Result<Vec<Option<PoolStateResponse>>> {
        if !self.batch {
            return Err(Error::Unsupported("batch pool reads"));
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.latency().await;
        let pools = self.pools.lock().unwrap();
        let mut states: Vec<_> = pool_ids
            .iter()
            .map(|id| pools.get(id).map(PoolStateResponse::from_snapshot))
            .collect();
        if self.truncate_batch {
            states.pop();
        }
        Ok(states)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn simulate_pool_state(
        &self,
        pool_id: PoolId,
        _now: i64,
    ) -> Result<Option<PoolStateResponse>> {
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);
        self.latency().await;
        if self.failing.lock().unwrap().contains(&pool_id) {
            return Err(Error::server_error(503, "simulation unavailable".to_string()));
        }
        Ok(self
            .simulated
            .lock()
            .unwrap()
            .get(&pool_id)
            .map(PoolStateResponse::from_snapshot))
    }

    fn supports_simulation(&self) -> bool {
        self.simulation
    }
}
