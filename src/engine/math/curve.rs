//! Coupled bonding surface.
//!
//! # Cost function
//!
//! ```text
//! C(sL, sS) = λ · (sL^(F/β) + sS^(F/β))^β
//! ```
//!
//! Every production pool uses F = 1, β = 1/2, which reduces to the L2 norm
//! of the supply vector:
//!
//! ```text
//! C     = λ · √(sL² + sS²)
//! p_L   = λ · sL / √(sL² + sS²)
//! p_S   = λ · sS / √(sL² + sS²)
//! r_L   = p_L · sL,   r_S = p_S · sS,   r_L + r_S = C
//! ```
//!
//! Raising one side's supply raises its price and, through the shared norm,
//! lowers the other side's. That canonical case runs on exact `U256` floor
//! arithmetic matching the ledger. Any other `(F, β)` goes through the
//! general `f64` path, which is slow and approximate; [`CoupledCurve::for_pool`]
//! logs when a pool lands there.
//!
//! Quotes are differences of cost, never integrals of price, so many small
//! trades do not compound rounding error.
//!
//! Older cubic and linear formulas have been seen in historical tooling.
//! They are deliberately not implemented here; the L2 surface is the one
//! the ledger enforces.

use alloy::primitives::U256;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::{checked_sqrt_product, isqrt};
use crate::consts::{CURRENCY_SCALE, EPSILON, TOKEN_SCALE};
use crate::types::{CurveParams, PoolId, Side};

/// Invalid trade quote input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("cannot sell {requested} tokens, only {available} in supply")]
    ExceedsSupply { requested: u128, available: u128 },
    #[error("supply outside curve domain: ({supply_long}, {supply_short})")]
    OutsideDomain { supply_long: u128, supply_short: u128 },
}

/// Result of simulating a buy of `side` with `currency_in` micro units.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuyQuote {
    pub side: Side,
    pub currency_in: u128,
    pub tokens_out: u128,
    pub new_supply_long: u128,
    pub new_supply_short: u128,
    pub price_before_micro: U256,
    pub price_after_micro: U256,
}

/// Result of simulating a sell of `tokens_in` atomic units of `side`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SellQuote {
    pub side: Side,
    pub tokens_in: u128,
    pub currency_out: u128,
    pub new_supply_long: u128,
    pub new_supply_short: u128,
    pub price_before_micro: U256,
    pub price_after_micro: U256,
}

impl BuyQuote {
    /// Average execution price in micro-currency per whole token.
    pub fn average_price_micro(&self) -> Option<u128> {
        self.currency_in
            .checked_mul(TOKEN_SCALE)
            .and_then(|n| n.checked_div(self.tokens_out))
    }
}

impl SellQuote {
    pub fn average_price_micro(&self) -> Option<u128> {
        self.currency_out
            .checked_mul(TOKEN_SCALE)
            .and_then(|n| n.checked_div(self.tokens_in))
    }
}

/// Pricing for one pool's curve parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoupledCurve {
    params: CurveParams,
}

impl CoupledCurve {
    /// Panics on invalid parameters (zero scale or coupling).
    pub fn new(params: CurveParams) -> Self {
        if let Err(e) = params.validate() {
            panic!("invalid curve parameters: {e}");
        }
        Self { params }
    }

    /// Construct for a pool read from the ledger, flagging any pool that
    /// is not on the canonical surface.
    pub fn for_pool(pool_id: &PoolId, params: CurveParams) -> Self {
        if !params.is_canonical() {
            warn!(
                pool = %pool_id,
                exponent = params.exponent,
                coupling = %format!("{}/{}", params.coupling_num, params.coupling_den),
                "Non-canonical curve parameters, using general slow path"
            );
        }
        Self::new(params)
    }

    pub fn params(&self) -> &CurveParams {
        &self.params
    }

    pub fn is_canonical(&self) -> bool {
        self.params.is_canonical()
    }

    fn lambda(&self) -> U256 {
        U256::from(self.params.scale_micro)
    }

    // =========================================================================
    // Integer path (micro units, atomic supplies)
    // =========================================================================

    /// Marginal price of `side` in micro-currency per whole token.
    ///
    /// With both supplies at zero this is the bootstrap price λ.
    pub fn price_micro(&self, supply_long: u128, supply_short: u128, side: Side) -> U256 {
        check_domain(supply_long, supply_short);
        if supply_long == 0 && supply_short == 0 {
            return self.lambda();
        }
        if !self.is_canonical() {
            let p = self.price(
                atomic_to_tokens(supply_long),
                atomic_to_tokens(supply_short),
                side,
            );
            return display_to_micro(p);
        }

        let s = U256::from(pick(supply_long, supply_short, side));
        if s.is_zero() {
            return U256::ZERO;
        }
        let n = norm_squared(supply_long, supply_short);
        let ls = self.lambda() * s;
        // floor(sqrt(floor(x))) == floor(sqrt(x)), so this is the exact floor
        // of λ·s/√N whenever (λ·s)² fits.
        match ls.checked_mul(ls) {
            Some(ls2) => isqrt(ls2 / n),
            None => ls / isqrt(n),
        }
    }

    /// `C · 10^6`: the cost function before dropping token decimals.
    fn scaled_cost(&self, supply_long: u128, supply_short: u128) -> U256 {
        if !self.is_canonical() {
            let c = self.cost(atomic_to_tokens(supply_long), atomic_to_tokens(supply_short));
            return display_to_micro(c) * U256::from(TOKEN_SCALE);
        }
        let n = norm_squared(supply_long, supply_short);
        let lambda = self.lambda();
        checked_sqrt_product(lambda * lambda, n).unwrap_or_else(|| lambda * isqrt(n))
    }

    /// Total cost of the supply vector in micro-currency.
    pub fn cost_micro(&self, supply_long: u128, supply_short: u128) -> U256 {
        check_domain(supply_long, supply_short);
        self.scaled_cost(supply_long, supply_short) / U256::from(TOKEN_SCALE)
    }

    /// Virtual reserves `(r_L, r_S)` in micro-currency.
    ///
    /// Each side is `C · s² / N` floored, so `r_L + r_S <= C` and the two
    /// differ from `C` by at most one unit.
    pub fn reserves_micro(&self, supply_long: u128, supply_short: u128) -> (U256, U256) {
        check_domain(supply_long, supply_short);
        if supply_long == 0 && supply_short == 0 {
            return (U256::ZERO, U256::ZERO);
        }
        if !self.is_canonical() {
            let sl = atomic_to_tokens(supply_long);
            let ss = atomic_to_tokens(supply_short);
            let rl = self.price(sl, ss, Side::Long) * sl;
            let rs = self.price(sl, ss, Side::Short) * ss;
            return (display_to_micro(rl), display_to_micro(rs));
        }

        let k = self.scaled_cost(supply_long, supply_short);
        let n = norm_squared(supply_long, supply_short);
        let denom = n * U256::from(TOKEN_SCALE);
        let side_reserve = |s: u128| {
            let s = U256::from(s);
            k * s * s / denom
        };
        (side_reserve(supply_long), side_reserve(supply_short))
    }

    /// Simulate buying `side` with `currency_in` micro units.
    ///
    /// Holds the other side fixed, raises cost by `currency_in` and inverts
    /// the cost function for the new target supply. Tokens out are floored
    /// and never negative. A buy that would push supply past 64 bits is
    /// rejected with [`QuoteError::OutsideDomain`].
    pub fn quote_buy(
        &self,
        supply_long: u128,
        supply_short: u128,
        side: Side,
        currency_in: u128,
    ) -> Result<BuyQuote, QuoteError> {
        quote_domain(supply_long, supply_short)?;
        let target = pick(supply_long, supply_short, side);
        let other = pick(supply_long, supply_short, side.other());

        let new_target = if self.is_canonical() {
            let lambda = self.lambda();
            let k1 = self.scaled_cost(supply_long, supply_short)
                + U256::from(currency_in) * U256::from(TOKEN_SCALE);
            let lo = lambda * U256::from(other);
            match (k1.checked_mul(k1), lo.checked_mul(lo)) {
                (Some(k1_sq), Some(lo_sq)) if k1_sq > lo_sq => {
                    u256_to_u128_saturating(isqrt(k1_sq - lo_sq) / lambda)
                }
                (Some(_), Some(_)) => target,
                _ => {
                    // Divide λ out first; loses at most one atomic unit.
                    let q = k1 / lambda;
                    let o = U256::from(other);
                    u256_to_u128_saturating(isqrt(q.saturating_mul(q).saturating_sub(o * o)))
                }
            }
        } else {
            let sl = atomic_to_tokens(supply_long);
            let ss = atomic_to_tokens(supply_short);
            let c1 = self.cost(sl, ss) + currency_in as f64 / CURRENCY_SCALE as f64;
            let t = self.supply_for_cost(c1, atomic_to_tokens(other));
            (t * TOKEN_SCALE as f64).floor() as u128
        };

        let new_target = new_target.max(target);
        let tokens_out = new_target - target;
        let (new_long, new_short) = assign(side, new_target, other);
        quote_domain(new_long, new_short)?;

        Ok(BuyQuote {
            side,
            currency_in,
            tokens_out,
            new_supply_long: new_long,
            new_supply_short: new_short,
            price_before_micro: self.price_micro(supply_long, supply_short, side),
            price_after_micro: self.price_micro(new_long, new_short, side),
        })
    }

    /// Simulate selling `tokens_in` atomic units of `side`.
    pub fn quote_sell(
        &self,
        supply_long: u128,
        supply_short: u128,
        side: Side,
        tokens_in: u128,
    ) -> Result<SellQuote, QuoteError> {
        quote_domain(supply_long, supply_short)?;
        let target = pick(supply_long, supply_short, side);
        let other = pick(supply_long, supply_short, side.other());
        if tokens_in > target {
            return Err(QuoteError::ExceedsSupply {
                requested: tokens_in,
                available: target,
            });
        }

        let (new_long, new_short) = assign(side, target - tokens_in, other);
        let k0 = self.scaled_cost(supply_long, supply_short);
        let k1 = self.scaled_cost(new_long, new_short);
        let currency_out =
            u256_to_u128_saturating(k0.saturating_sub(k1) / U256::from(TOKEN_SCALE));

        Ok(SellQuote {
            side,
            tokens_in,
            currency_out,
            new_supply_long: new_long,
            new_supply_short: new_short,
            price_before_micro: self.price_micro(supply_long, supply_short, side),
            price_after_micro: self.price_micro(new_long, new_short, side),
        })
    }

    // =========================================================================
    // Display path (whole tokens, currency units)
    // =========================================================================

    fn lambda_display(&self) -> f64 {
        self.params.scale_micro as f64 / CURRENCY_SCALE as f64
    }

    /// F / β
    fn ratio(&self) -> f64 {
        f64::from(self.params.exponent) / self.params.beta()
    }

    /// Marginal price in currency per token for supplies in whole tokens.
    pub fn price(&self, supply_long: f64, supply_short: f64, side: Side) -> f64 {
        assert!(
            supply_long >= 0.0 && supply_short >= 0.0,
            "supplies must be non-negative: ({supply_long}, {supply_short})"
        );
        let lambda = self.lambda_display();
        if supply_long <= EPSILON && supply_short <= EPSILON {
            return lambda;
        }
        let s = if side == Side::Long { supply_long } else { supply_short };

        if self.is_canonical() {
            return lambda * s / supply_long.hypot(supply_short);
        }

        let r = self.ratio();
        let beta = self.params.beta();
        let sum = supply_long.powf(r) + supply_short.powf(r);
        lambda * f64::from(self.params.exponent) * s.powf(r - 1.0) * sum.powf(beta - 1.0)
    }

    /// Cost function in currency units for supplies in whole tokens.
    pub fn cost(&self, supply_long: f64, supply_short: f64) -> f64 {
        let lambda = self.lambda_display();
        if self.is_canonical() {
            return lambda * supply_long.hypot(supply_short);
        }
        let r = self.ratio();
        lambda * (supply_long.powf(r) + supply_short.powf(r)).powf(self.params.beta())
    }

    /// Invert the cost function for the target supply, other side fixed.
    ///
    /// Panics if `cost` is below what the other side alone already costs,
    /// which no valid trade can produce.
    pub fn supply_for_cost(&self, cost: f64, other_supply: f64) -> f64 {
        let lambda = self.lambda_display();
        let r = self.ratio();
        let radicand = (cost / lambda).powf(1.0 / self.params.beta()) - other_supply.powf(r);
        // Float noise around an exact boundary is clamped, real deficits are not.
        let tolerance = EPSILON * other_supply.powf(r).max(1.0);
        assert!(
            radicand >= -tolerance,
            "cost {cost} below the floor set by other supply {other_supply}"
        );
        radicand.max(0.0).powf(1.0 / r)
    }
}

/// Largest atomic supply per side. Keeps every canonical intermediate
/// within `U256`.
pub const MAX_SUPPLY: u128 = u64::MAX as u128;

fn in_domain(supply_long: u128, supply_short: u128) -> bool {
    supply_long <= MAX_SUPPLY && supply_short <= MAX_SUPPLY
}

fn check_domain(supply_long: u128, supply_short: u128) {
    assert!(
        in_domain(supply_long, supply_short),
        "supply outside curve domain: ({supply_long}, {supply_short})"
    );
}

fn quote_domain(supply_long: u128, supply_short: u128) -> Result<(), QuoteError> {
    if in_domain(supply_long, supply_short) {
        Ok(())
    } else {
        Err(QuoteError::OutsideDomain {
            supply_long,
            supply_short,
        })
    }
}

fn norm_squared(supply_long: u128, supply_short: u128) -> U256 {
    let l = U256::from(supply_long);
    let s = U256::from(supply_short);
    l * l + s * s
}

fn pick(supply_long: u128, supply_short: u128, side: Side) -> u128 {
    match side {
        Side::Long => supply_long,
        Side::Short => supply_short,
    }
}

fn assign(side: Side, target: u128, other: u128) -> (u128, u128) {
    match side {
        Side::Long => (target, other),
        Side::Short => (other, target),
    }
}

fn atomic_to_tokens(atomic: u128) -> f64 {
    atomic as f64 / TOKEN_SCALE as f64
}

fn display_to_micro(value: f64) -> U256 {
    if !value.is_finite() || value <= 0.0 {
        return U256::ZERO;
    }
    U256::from((value * CURRENCY_SCALE as f64).floor() as u128)
}

fn u256_to_u128_saturating(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}
