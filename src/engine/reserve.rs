//! Virtual reserve accounting and relevance.
//!
//! The ledger keeps `reserve_s == price_s × supply_s` per side after every
//! trade; this model derives display values from that invariant and checks
//! it (plus vault coverage) on snapshots read back from the ledger.

use alloy::primitives::U256;
use serde::Serialize;
use tracing::error;

use super::math::{decode_price_micro, BuyQuote, CoupledCurve, QuoteError, SellQuote};
use crate::consts::{NEUTRAL_RELEVANCE, RELEVANCE_SCALE, TOKEN_SCALE};
use crate::types::{PoolId, PoolSnapshot, Side};
use crate::Error;

/// Share of reserve held by LONG, in `[0, 1]`. Neutral when both are zero.
pub fn relevance(reserve_long: u128, reserve_short: u128) -> f64 {
    let total = reserve_long as f64 + reserve_short as f64;
    if total <= 0.0 {
        return NEUTRAL_RELEVANCE;
    }
    (reserve_long as f64 / total).clamp(0.0, 1.0)
}

/// [`relevance`] in millionths, exact.
pub fn relevance_micro(reserve_long: u128, reserve_short: u128) -> u128 {
    let total = U256::from(reserve_long) + U256::from(reserve_short);
    if total.is_zero() {
        return RELEVANCE_SCALE / 2;
    }
    let share = U256::from(reserve_long) * U256::from(RELEVANCE_SCALE) / total;
    u128::try_from(share).unwrap_or(RELEVANCE_SCALE)
}

/// One side whose ledger reserve disagrees with its price × supply.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReserveDrift {
    pub side: Side,
    pub ledger_reserve: u128,
    pub implied_reserve: u128,
    pub tolerance: u128,
}

/// Invariant check over one snapshot. Never corrects anything.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// `reserve_long + reserve_short - vault_balance`, if positive.
    pub vault_shortfall: Option<u128>,
    pub drift: Vec<ReserveDrift>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.vault_shortfall.is_none() && self.drift.is_empty()
    }

    /// Collapse into the first violation as an [`Error::Inconsistent`].
    pub fn into_result(self, pool_id: PoolId) -> Result<(), Error> {
        if let Some(shortfall) = self.vault_shortfall {
            return Err(Error::Inconsistent {
                pool_id,
                detail: format!("vault short of reserves by {shortfall}"),
            });
        }
        if let Some(d) = self.drift.first() {
            return Err(Error::Inconsistent {
                pool_id,
                detail: format!(
                    "{} reserve {} differs from price x supply {} beyond {}",
                    d.side, d.ledger_reserve, d.implied_reserve, d.tolerance
                ),
            });
        }
        Ok(())
    }
}

/// Reserve-side view of a pool: prices, quotes and invariant checks.
#[derive(Debug, Clone)]
pub struct ReserveModel {
    curve: CoupledCurve,
}

impl ReserveModel {
    pub fn new(curve: CoupledCurve) -> Self {
        Self { curve }
    }

    /// Model for a pool snapshot; flags non-canonical curve parameters.
    pub fn for_snapshot(snapshot: &PoolSnapshot) -> Self {
        Self::new(CoupledCurve::for_pool(
            &snapshot.pool_id,
            snapshot.curve_params(),
        ))
    }

    pub fn curve(&self) -> &CoupledCurve {
        &self.curve
    }

    /// Virtual reserves the curve assigns to a supply vector.
    pub fn reserves_from_supply(&self, supply_long: u128, supply_short: u128) -> (u128, u128) {
        let (rl, rs) = self.curve.reserves_micro(supply_long, supply_short);
        (saturate(rl), saturate(rs))
    }

    /// Price of `side` in micro units per whole token.
    ///
    /// Uses the ledger's sqrt price; an unset (zero) sqrt price falls back to
    /// the curve price at the snapshot's supplies, which is λ at zero supply.
    pub fn side_price_micro(&self, snapshot: &PoolSnapshot, side: Side) -> U256 {
        decode_price_micro(snapshot.sqrt_price_x96(side)).unwrap_or_else(|| {
            self.curve
                .price_micro(snapshot.supply_long, snapshot.supply_short, side)
        })
    }

    pub fn quote_buy(
        &self,
        snapshot: &PoolSnapshot,
        side: Side,
        currency_in: u128,
    ) -> Result<BuyQuote, QuoteError> {
        self.curve
            .quote_buy(snapshot.supply_long, snapshot.supply_short, side, currency_in)
    }

    pub fn quote_sell(
        &self,
        snapshot: &PoolSnapshot,
        side: Side,
        tokens_in: u128,
    ) -> Result<SellQuote, QuoteError> {
        self.curve
            .quote_sell(snapshot.supply_long, snapshot.supply_short, side, tokens_in)
    }

    /// Check vault coverage and `reserve == price × supply` per side.
    ///
    /// The price-side tolerance is one micro unit per whole token held (the
    /// price itself is floored to micro units) plus one.
    pub fn audit(&self, snapshot: &PoolSnapshot) -> AuditReport {
        let mut report = AuditReport::default();

        let reserves = snapshot.total_reserve();
        if snapshot.vault_balance < reserves {
            report.vault_shortfall = Some(reserves - snapshot.vault_balance);
        }

        for side in [Side::Long, Side::Short] {
            let supply = snapshot.supply(side);
            if snapshot.sqrt_price_x96(side).is_zero() {
                continue;
            }
            let price = self.side_price_micro(snapshot, side);
            let implied = saturate(price * U256::from(supply) / U256::from(TOKEN_SCALE));
            let ledger = snapshot.reserve(side);
            let tolerance = supply / TOKEN_SCALE + 1;
            if ledger.abs_diff(implied) > tolerance {
                report.drift.push(ReserveDrift {
                    side,
                    ledger_reserve: ledger,
                    implied_reserve: implied,
                    tolerance,
                });
            }
        }

        if !report.is_consistent() {
            error!(
                pool = %snapshot.pool_id,
                vault = snapshot.vault_balance,
                reserve_long = snapshot.reserve_long,
                reserve_short = snapshot.reserve_short,
                shortfall = ?report.vault_shortfall,
                drifted_sides = report.drift.len(),
                "Ledger pool violates reserve invariants"
            );
        }
        report
    }
}

fn saturate(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}
