//! Epoch settlement.
//!
//! Moves reserve between the sides according to how far the realized score
//! sits from the pool's implied relevance:
//!
//! ```text
//! q  = r_L / (r_L + r_S)                  (millionths)
//! q' = q + k · (x - q) / 10^4              (k = strength in bps)
//! r_L' = floor(T · q' / 10^6),  r_S' = T - r_L'
//! ```
//!
//! The side whose implied share was closer to the realized score gains. The
//! total `T` is conserved exactly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::reserve::relevance_micro;
use crate::consts::{BPS_DENOMINATOR, RELEVANCE_SCALE};
use crate::ledger::LedgerReader;
use crate::prelude::*;
use crate::types::{PoolId, PoolSnapshot};
use crate::Error;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SettlementParams {
    /// Fraction of the relevance gap closed per settlement.
    pub strength_bps: u32,
    /// Cooldown applied when the ledger reports a shorter one.
    pub min_interval_floor_secs: i64,
}

impl Default for SettlementParams {
    fn default() -> Self {
        Self {
            strength_bps: 1_000,
            min_interval_floor_secs: 0,
        }
    }
}

impl SettlementParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if u128::from(self.strength_bps) > BPS_DENOMINATOR {
            return Err(format!(
                "strength_bps must be <= {BPS_DENOMINATOR}, got {}",
                self.strength_bps
            ));
        }
        if self.min_interval_floor_secs < 0 {
            return Err("min_interval_floor_secs must be >= 0".to_string());
        }
        Ok(())
    }
}

/// Reserves before and after one settlement.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub pool_id: PoolId,
    pub settled_at: i64,
    pub score_micro: u128,
    pub relevance_before_micro: u128,
    pub relevance_after_micro: u128,
    pub reserve_long_before: u128,
    pub reserve_short_before: u128,
    pub reserve_long: u128,
    pub reserve_short: u128,
}

impl SettlementOutcome {
    /// Signed reserve moved to LONG (negative when LONG paid).
    pub fn transfer_to_long(&self) -> i128 {
        self.reserve_long as i128 - self.reserve_long_before as i128
    }
}

/// Convert a realized score in `[0, 1]` to millionths, clamping.
pub fn score_to_micro(score: f64) -> u128 {
    if !score.is_finite() {
        return RELEVANCE_SCALE / 2;
    }
    (score.clamp(0.0, 1.0) * RELEVANCE_SCALE as f64).round() as u128
}

#[derive(Debug, Clone, Default)]
pub struct SettlementEngine {
    params: SettlementParams,
}

impl SettlementEngine {
    pub fn new(params: SettlementParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SettlementParams {
        &self.params
    }

    /// Minimum seconds between settlements of this pool.
    pub fn cooldown_secs(&self, snapshot: &PoolSnapshot) -> i64 {
        snapshot
            .min_settle_interval
            .max(self.params.min_interval_floor_secs)
    }

    /// Cooldown seconds left at `now`, or `None` when settlement may run.
    pub fn remaining_cooldown(&self, snapshot: &PoolSnapshot, now: i64) -> Option<i64> {
        let interval = self.cooldown_secs(snapshot);
        let elapsed = now.saturating_sub(snapshot.last_settle_ts);
        (elapsed < interval).then(|| interval - elapsed)
    }

    /// Compute post-settlement reserves. `TooEarly` inside the cooldown.
    ///
    /// `score_micro` above 10^6 is clamped.
    pub fn settle(
        &self,
        snapshot: &PoolSnapshot,
        score_micro: u128,
        now: i64,
    ) -> Result<SettlementOutcome> {
        if let Some(remaining_secs) = self.remaining_cooldown(snapshot, now) {
            return Err(Error::TooEarly {
                pool_id: snapshot.pool_id,
                remaining_secs,
            });
        }

        let x = score_micro.min(RELEVANCE_SCALE) as i128;
        let q = relevance_micro(snapshot.reserve_long, snapshot.reserve_short) as i128;
        let k = i128::from(self.params.strength_bps);
        let q_new = (q + k * (x - q) / BPS_DENOMINATOR as i128).clamp(0, RELEVANCE_SCALE as i128);
        let q_new = q_new as u128;

        let total = snapshot.total_reserve();
        let long = U256::from(total) * U256::from(q_new) / U256::from(RELEVANCE_SCALE);
        let reserve_long = u128::try_from(long).unwrap_or(total).min(total);
        let reserve_short = total - reserve_long;

        Ok(SettlementOutcome {
            pool_id: snapshot.pool_id,
            settled_at: now,
            score_micro: x as u128,
            relevance_before_micro: q as u128,
            relevance_after_micro: relevance_micro(reserve_long, reserve_short),
            reserve_long_before: snapshot.reserve_long,
            reserve_short_before: snapshot.reserve_short,
            reserve_long,
            reserve_short,
        })
    }
}

/// A settlement applied here that the ledger may not reflect yet.
#[derive(Debug, Clone, Copy)]
struct LocalSettlement {
    settled_at: i64,
    cooldown_until: i64,
}

type Gate = Arc<Mutex<Option<LocalSettlement>>>;

/// Serializes settlement per pool against the ledger's reserves.
///
/// The cooldown check and the recorded settlement time are updated under
/// one per-pool lock, and the local record covers the window before the
/// ledger reflects a settlement, so a repeated call is `TooEarly` rather
/// than a second application.
///
/// Gates are dropped once idle with no cooldown outstanding, so the map
/// only holds pools settled within their last interval.
#[derive(Debug)]
pub struct SettlementCoordinator {
    engine: SettlementEngine,
    reader: LedgerReader,
    budget: Duration,
    gates: Mutex<HashMap<PoolId, Gate>>,
}

impl SettlementCoordinator {
    pub fn new(engine: SettlementEngine, reader: LedgerReader, budget: Duration) -> Self {
        Self {
            engine,
            reader,
            budget,
            gates: Mutex::new(HashMap::new()),
        }
    }

    async fn gate(&self, pool_id: PoolId, now: i64) -> Gate {
        let mut gates = self.gates.lock().await;
        // Clones are only taken under the map lock, so a count of one means
        // no caller holds or waits on the gate.
        gates.retain(|id, gate| {
            *id == pool_id
                || Arc::strong_count(gate) > 1
                || gate
                    .try_lock()
                    .map_or(true, |local| matches!(*local, Some(l) if l.cooldown_until > now))
        });
        gates.entry(pool_id).or_default().clone()
    }

    #[cfg(test)]
    pub(crate) async fn tracked_pools(&self) -> usize {
        self.gates.lock().await.len()
    }

    /// Settle `pool_id` at `now` against freshly read ledger reserves.
    pub async fn settle(
        &self,
        pool_id: PoolId,
        score_micro: u128,
        now: i64,
    ) -> Result<SettlementOutcome> {
        let gate = self.gate(pool_id, now).await;
        let mut last_local = gate.lock().await;

        let mut snapshot = self.reader.fetch(pool_id, self.budget).await?;
        if let Some(LocalSettlement { settled_at, .. }) = *last_local {
            if settled_at > snapshot.last_settle_ts {
                debug!(
                    pool = %pool_id,
                    ledger = snapshot.last_settle_ts,
                    local = settled_at,
                    "Ledger has not caught up with local settlement"
                );
                snapshot.last_settle_ts = settled_at;
            }
        }

        let outcome = self.engine.settle(&snapshot, score_micro, now)?;
        *last_local = Some(LocalSettlement {
            settled_at: now,
            cooldown_until: now.saturating_add(self.engine.cooldown_secs(&snapshot)),
        });
        info!(
            pool = %pool_id,
            score = outcome.score_micro,
            relevance_before = outcome.relevance_before_micro,
            relevance_after = outcome.relevance_after_micro,
            transfer_to_long = outcome.transfer_to_long(),
            "Settled pool"
        );
        Ok(outcome)
    }
}
