//! Pool entity types.

use std::fmt;

use alloy::primitives::{B256, U256};
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_BOOTSTRAP_PRICE_MICRO;

/// 32-byte content identifier of a pool.
pub type PoolId = B256;

/// One of the two opposing token sides of a pool.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            _ => Err(format!("unknown side '{s}', expected long or short")),
        }
    }
}

/// Curve shape parameters, fixed per pool at creation.
///
/// `scale_micro` (λ) is the bootstrap price in micro-currency per whole
/// token; the cost of a supply vector is `λ · ‖s‖`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurveParams {
    /// F
    pub exponent: u32,
    /// β numerator
    pub coupling_num: u32,
    /// β denominator
    pub coupling_den: u32,
    pub scale_micro: u128,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            exponent: 1,
            coupling_num: 1,
            coupling_den: 2,
            scale_micro: DEFAULT_BOOTSTRAP_PRICE_MICRO,
        }
    }
}

impl CurveParams {
    /// F = 1, β = 1/2: the L2-norm surface every production pool uses.
    pub fn is_canonical(&self) -> bool {
        self.exponent == 1
            && self.coupling_den != 0
            && u64::from(self.coupling_num) * 2 == u64::from(self.coupling_den)
    }

    /// β as a float. Panics on a zero denominator.
    pub fn beta(&self) -> f64 {
        assert!(self.coupling_den != 0, "coupling denominator must be non-zero");
        f64::from(self.coupling_num) / f64::from(self.coupling_den)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.exponent == 0 {
            return Err("curve exponent must be >= 1".to_string());
        }
        if self.coupling_num == 0 || self.coupling_den == 0 {
            return Err(format!(
                "coupling ratio must be positive, got {}/{}",
                self.coupling_num, self.coupling_den
            ));
        }
        if self.coupling_num > self.coupling_den {
            return Err(format!(
                "coupling ratio must be <= 1, got {}/{}",
                self.coupling_num, self.coupling_den
            ));
        }
        if self.scale_micro == 0 {
            return Err("curve scale must be > 0".to_string());
        }
        Ok(())
    }
}

/// Curve fields as the ledger reports them. The ledger does not repeat
/// these on every read, so each one may be absent.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurveFields {
    pub exponent: Option<u32>,
    pub coupling_num: Option<u32>,
    pub coupling_den: Option<u32>,
    pub scale_micro: Option<u128>,
}

impl CurveFields {
    pub fn from_params(params: &CurveParams) -> Self {
        Self {
            exponent: Some(params.exponent),
            coupling_num: Some(params.coupling_num),
            coupling_den: Some(params.coupling_den),
            scale_micro: Some(params.scale_micro),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.exponent.is_some()
            && self.coupling_num.is_some()
            && self.coupling_den.is_some()
            && self.scale_micro.is_some()
    }

    /// Fill absent fields from `fallback`.
    pub fn resolve(&self, fallback: &CurveParams) -> CurveParams {
        CurveParams {
            exponent: self.exponent.unwrap_or(fallback.exponent),
            coupling_num: self.coupling_num.unwrap_or(fallback.coupling_num),
            coupling_den: self.coupling_den.unwrap_or(fallback.coupling_den),
            scale_micro: self.scale_micro.unwrap_or(fallback.scale_micro),
        }
    }
}

/// Lifecycle phase inferred from a snapshot. The engine only observes it.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolPhase {
    /// No liquidity has ever been deployed.
    Created,
    /// Deployed and trading (settlement cycles included).
    Trading,
    /// Supplies are zero and reserves drained after having been active.
    Closed,
}

/// Authoritative pool state as read from the ledger, fully decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub pool_id: PoolId,
    pub supply_long: u128,
    pub supply_short: u128,
    pub reserve_long: u128,
    pub reserve_short: u128,
    pub sqrt_price_long_x96: U256,
    pub sqrt_price_short_x96: U256,
    pub curve: CurveFields,
    pub vault_balance: u128,
    pub last_settle_ts: i64,
    pub min_settle_interval: i64,
    pub expiration_ts: Option<i64>,
    pub last_decay_update: i64,
    /// Unix seconds at which the ledger state was observed.
    pub observed_at: i64,
}

impl PoolSnapshot {
    pub fn supply(&self, side: Side) -> u128 {
        match side {
            Side::Long => self.supply_long,
            Side::Short => self.supply_short,
        }
    }

    pub fn reserve(&self, side: Side) -> u128 {
        match side {
            Side::Long => self.reserve_long,
            Side::Short => self.reserve_short,
        }
    }

    pub fn sqrt_price_x96(&self, side: Side) -> U256 {
        match side {
            Side::Long => self.sqrt_price_long_x96,
            Side::Short => self.sqrt_price_short_x96,
        }
    }

    pub fn total_reserve(&self) -> u128 {
        self.reserve_long.saturating_add(self.reserve_short)
    }

    /// Curve parameters with absent fields taken from the canonical defaults.
    pub fn curve_params(&self) -> CurveParams {
        self.curve.resolve(&CurveParams::default())
    }

    pub fn phase(&self) -> PoolPhase {
        let empty = self.supply_long == 0
            && self.supply_short == 0
            && self.reserve_long == 0
            && self.reserve_short == 0;
        if !empty {
            PoolPhase::Trading
        } else if self.last_settle_ts > 0 || self.last_decay_update > 0 {
            PoolPhase::Closed
        } else {
            PoolPhase::Created
        }
    }
}
