//! Read-only decay projection.
//!
//! Once a pool passes its expiration, the ledger shrinks both virtual
//! reserves once per whole elapsed day. The ledger's `simulatePoolState`
//! call is the ground truth and is used whenever the ledger serves it. The
//! local law below is a best-effort re-derivation:
//!
//! ```text
//! days   = floor((now - max(expiration, last_decay_update)) / 86400)
//! factor = max((1 - rate_bps / 10^4)^days, floor_bps / 10^4)
//! r_s'   = floor(r_s · factor)
//! ```
//!
//! Both sides use the same factor, so relevance is unchanged and
//! `vault_balance` is never touched.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::{BPS_DENOMINATOR, SECONDS_PER_DAY};
use crate::ledger::LedgerReader;
use crate::types::{PoolId, PoolSnapshot};

/// Factor precision (millionths).
const FACTOR_SCALE: u128 = 1_000_000;

/// Local decay law parameters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecayParams {
    /// Reserve shrink per whole day past expiration.
    pub daily_rate_bps: u32,
    /// Decay never takes a reserve below this share of its pre-decay value.
    pub floor_bps: u32,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            daily_rate_bps: 100,
            floor_bps: 2_500,
        }
    }
}

impl DecayParams {
    pub fn validate(&self) -> Result<(), String> {
        if u128::from(self.daily_rate_bps) > BPS_DENOMINATOR {
            return Err(format!(
                "daily_rate_bps must be <= {BPS_DENOMINATOR}, got {}",
                self.daily_rate_bps
            ));
        }
        if u128::from(self.floor_bps) > BPS_DENOMINATOR {
            return Err(format!(
                "floor_bps must be <= {BPS_DENOMINATOR}, got {}",
                self.floor_bps
            ));
        }
        Ok(())
    }

    /// `(1 - rate)^days` in millionths, floored at `floor_bps`.
    pub fn factor_micro(&self, days: u64) -> u128 {
        let floor = u128::from(self.floor_bps) * FACTOR_SCALE / BPS_DENOMINATOR;
        let keep = BPS_DENOMINATOR - u128::from(self.daily_rate_bps).min(BPS_DENOMINATOR);
        let mut factor = FACTOR_SCALE;
        for _ in 0..days {
            if factor <= floor || keep == BPS_DENOMINATOR {
                break;
            }
            factor = factor * keep / BPS_DENOMINATOR;
        }
        factor.max(floor)
    }
}

/// Where a projection's reserves came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecaySource {
    Ledger,
    Local,
}

/// Decayed view of a pool at one instant. Built whole, never patched.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DecayProjection {
    pub pool_id: PoolId,
    pub as_of: i64,
    /// Whole days since expiration.
    pub days_expired: u64,
    /// Whole days of decay the ledger has not applied yet.
    pub pending_days: u64,
    pub decay_pending: bool,
    pub factor_micro: u128,
    pub reserve_long: u128,
    pub reserve_short: u128,
    pub source: DecaySource,
}

fn whole_days_since(start: i64, now: i64) -> u64 {
    if now <= start {
        return 0;
    }
    ((now - start) / SECONDS_PER_DAY) as u64
}

fn scale(reserve: u128, factor_micro: u128) -> u128 {
    reserve
        .checked_mul(factor_micro)
        .map(|v| v / FACTOR_SCALE)
        .unwrap_or_else(|| reserve / FACTOR_SCALE * factor_micro)
}

/// Project `snapshot` to `now` with the local law. Pure.
pub fn project_local(params: &DecayParams, snapshot: &PoolSnapshot, now: i64) -> DecayProjection {
    let (days_expired, pending_days) = match snapshot.expiration_ts {
        Some(expiration) => (
            whole_days_since(expiration, now),
            whole_days_since(expiration.max(snapshot.last_decay_update), now),
        ),
        None => (0, 0),
    };
    let factor_micro = params.factor_micro(pending_days);

    DecayProjection {
        pool_id: snapshot.pool_id,
        as_of: now,
        days_expired,
        pending_days,
        decay_pending: pending_days > 0,
        factor_micro,
        reserve_long: scale(snapshot.reserve_long, factor_micro),
        reserve_short: scale(snapshot.reserve_short, factor_micro),
        source: DecaySource::Local,
    }
}

/// Decay projection, preferring the ledger's own simulation.
#[derive(Debug, Clone)]
pub struct DecayEngine {
    params: DecayParams,
    ledger: Option<LedgerReader>,
    budget: Duration,
}

impl DecayEngine {
    pub fn new(params: DecayParams) -> Self {
        Self {
            params,
            ledger: None,
            budget: Duration::from_secs(2),
        }
    }

    /// Ask the ledger to simulate decay, within `budget`, before falling
    /// back to the local law.
    pub fn with_ledger(mut self, reader: LedgerReader, budget: Duration) -> Self {
        self.ledger = Some(reader);
        self.budget = budget;
        self
    }

    pub fn params(&self) -> &DecayParams {
        &self.params
    }

    pub fn project_local(&self, snapshot: &PoolSnapshot, now: i64) -> DecayProjection {
        project_local(&self.params, snapshot, now)
    }

    /// Project `snapshot` to `now`. Never fails; a failed or unsupported
    /// simulation degrades to the local law.
    pub async fn project(&self, snapshot: &PoolSnapshot, now: i64) -> DecayProjection {
        let local = self.project_local(snapshot, now);
        if !local.decay_pending {
            return local;
        }
        let Some(reader) = self.ledger.as_ref().filter(|r| r.supports_simulation()) else {
            return local;
        };

        match reader.simulate(snapshot.pool_id, now, self.budget).await {
            Ok(simulated) => {
                let before = snapshot.total_reserve();
                let factor_micro = if before == 0 {
                    FACTOR_SCALE
                } else {
                    simulated.total_reserve().saturating_mul(FACTOR_SCALE) / before
                };
                debug!(
                    pool = %snapshot.pool_id,
                    ledger_factor = factor_micro,
                    local_factor = local.factor_micro,
                    "Using ledger decay simulation"
                );
                DecayProjection {
                    factor_micro,
                    reserve_long: simulated.reserve_long,
                    reserve_short: simulated.reserve_short,
                    source: DecaySource::Ledger,
                    ..local
                }
            }
            Err(e) => {
                warn!(
                    pool = %snapshot.pool_id,
                    error = %e,
                    "Decay simulation unavailable, using local projection"
                );
                local
            }
        }
    }
}
