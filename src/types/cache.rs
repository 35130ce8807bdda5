//! Local cache row and partial-field patches.

use std::collections::BTreeSet;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use super::{CurveFields, PoolId, PoolSnapshot};
use crate::serde_utils::{opt_u128_string, u128_string, u256_string};

/// Denormalized, eventually consistent mirror of a pool.
///
/// Written only by the reconciler; read by presentation code.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub pool_id: PoolId,
    #[serde(with = "u128_string")]
    pub supply_long: u128,
    #[serde(with = "u128_string")]
    pub supply_short: u128,
    #[serde(with = "u128_string")]
    pub reserve_long: u128,
    #[serde(with = "u128_string")]
    pub reserve_short: u128,
    #[serde(with = "u256_string")]
    pub sqrt_price_long_x96: U256,
    #[serde(with = "u256_string")]
    pub sqrt_price_short_x96: U256,
    #[serde(with = "u128_string")]
    pub vault_balance: u128,
    pub last_settle_ts: i64,
    pub min_settle_interval: i64,
    pub expiration_ts: Option<i64>,
    pub last_decay_update: i64,
    pub curve_exponent: Option<u32>,
    pub coupling_num: Option<u32>,
    pub coupling_den: Option<u32>,
    #[serde(default, with = "opt_u128_string")]
    pub scale_micro: Option<u128>,
    pub last_synced_at: Option<i64>,
}

impl CacheRecord {
    /// An empty row for a pool that has never been synced.
    pub fn empty(pool_id: PoolId) -> Self {
        Self {
            pool_id,
            supply_long: 0,
            supply_short: 0,
            reserve_long: 0,
            reserve_short: 0,
            sqrt_price_long_x96: U256::ZERO,
            sqrt_price_short_x96: U256::ZERO,
            vault_balance: 0,
            last_settle_ts: 0,
            min_settle_interval: 0,
            expiration_ts: None,
            last_decay_update: 0,
            curve_exponent: None,
            coupling_num: None,
            coupling_den: None,
            scale_micro: None,
            last_synced_at: None,
        }
    }

    pub fn curve_fields(&self) -> CurveFields {
        CurveFields {
            exponent: self.curve_exponent,
            coupling_num: self.coupling_num,
            coupling_den: self.coupling_den,
            scale_micro: self.scale_micro,
        }
    }

    /// View the cached row as a snapshot so pure engine code can run on it.
    pub fn to_snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            pool_id: self.pool_id,
            supply_long: self.supply_long,
            supply_short: self.supply_short,
            reserve_long: self.reserve_long,
            reserve_short: self.reserve_short,
            sqrt_price_long_x96: self.sqrt_price_long_x96,
            sqrt_price_short_x96: self.sqrt_price_short_x96,
            curve: self.curve_fields(),
            vault_balance: self.vault_balance,
            last_settle_ts: self.last_settle_ts,
            min_settle_interval: self.min_settle_interval,
            expiration_ts: self.expiration_ts,
            last_decay_update: self.last_decay_update,
            observed_at: self.last_synced_at.unwrap_or(0),
        }
    }
}

/// Addressable cache columns.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CacheField {
    SupplyLong,
    SupplyShort,
    ReserveLong,
    ReserveShort,
    SqrtPriceLong,
    SqrtPriceShort,
    VaultBalance,
    LastSettleTs,
    MinSettleInterval,
    ExpirationTs,
    LastDecayUpdate,
    CurveExponent,
    CouplingNum,
    CouplingDen,
    CurveScale,
    LastSyncedAt,
}

impl CacheField {
    /// Volatile fields change on every trade and are always overwritten.
    pub fn is_volatile(self) -> bool {
        !matches!(
            self,
            CacheField::CurveExponent
                | CacheField::CouplingNum
                | CacheField::CouplingDen
                | CacheField::CurveScale
        )
    }
}

/// How curve-parameter columns are treated by a patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurveWriteMode {
    /// Write only into columns that are currently unset.
    Backfill,
    /// Write every column the ledger reported (repair path).
    Overwrite,
}

/// Fields written (and, among those, changed) by one patch.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedFields {
    pub written: BTreeSet<CacheField>,
    pub changed: BTreeSet<CacheField>,
}

impl AppliedFields {
    fn record(&mut self, field: CacheField, changed: bool) {
        self.written.insert(field);
        if changed {
            self.changed.insert(field);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    pub fn contains(&self, field: CacheField) -> bool {
        self.written.contains(&field)
    }
}

/// A partial-field upsert derived from one ledger snapshot.
///
/// Applying a patch is all-or-nothing: stores apply it to a copy of the
/// row and swap the copy in only once every field has been written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePatch {
    pub pool_id: PoolId,
    pub snapshot: PoolSnapshot,
    pub curve_mode: CurveWriteMode,
}

macro_rules! write_field {
    ($applied:ident, $record:ident . $col:ident, $value:expr, $field:expr) => {{
        let value = $value;
        let changed = $record.$col != value;
        $record.$col = value;
        $applied.record($field, changed);
    }};
}

macro_rules! write_curve_field {
    ($applied:ident, $mode:expr, $record:ident . $col:ident, $value:expr, $field:expr) => {{
        if let Some(value) = $value {
            let allowed = match $mode {
                CurveWriteMode::Backfill => $record.$col.is_none(),
                CurveWriteMode::Overwrite => true,
            };
            if allowed {
                let changed = $record.$col != Some(value);
                $record.$col = Some(value);
                $applied.record($field, changed);
            }
        }
    }};
}

impl CachePatch {
    pub fn from_snapshot(snapshot: PoolSnapshot, curve_mode: CurveWriteMode) -> Self {
        Self {
            pool_id: snapshot.pool_id,
            snapshot,
            curve_mode,
        }
    }

    /// Apply to `record` in place and report what was written.
    pub fn apply(&self, record: &mut CacheRecord) -> AppliedFields {
        let s = &self.snapshot;
        let mut applied = AppliedFields::default();

        write_field!(applied, record.supply_long, s.supply_long, CacheField::SupplyLong);
        write_field!(applied, record.supply_short, s.supply_short, CacheField::SupplyShort);
        write_field!(applied, record.reserve_long, s.reserve_long, CacheField::ReserveLong);
        write_field!(applied, record.reserve_short, s.reserve_short, CacheField::ReserveShort);
        write_field!(
            applied,
            record.sqrt_price_long_x96,
            s.sqrt_price_long_x96,
            CacheField::SqrtPriceLong
        );
        write_field!(
            applied,
            record.sqrt_price_short_x96,
            s.sqrt_price_short_x96,
            CacheField::SqrtPriceShort
        );
        write_field!(applied, record.vault_balance, s.vault_balance, CacheField::VaultBalance);
        write_field!(applied, record.last_settle_ts, s.last_settle_ts, CacheField::LastSettleTs);
        write_field!(
            applied,
            record.min_settle_interval,
            s.min_settle_interval,
            CacheField::MinSettleInterval
        );
        write_field!(applied, record.expiration_ts, s.expiration_ts, CacheField::ExpirationTs);
        write_field!(
            applied,
            record.last_decay_update,
            s.last_decay_update,
            CacheField::LastDecayUpdate
        );

        let mode = self.curve_mode;
        write_curve_field!(
            applied,
            mode,
            record.curve_exponent,
            s.curve.exponent,
            CacheField::CurveExponent
        );
        write_curve_field!(
            applied,
            mode,
            record.coupling_num,
            s.curve.coupling_num,
            CacheField::CouplingNum
        );
        write_curve_field!(
            applied,
            mode,
            record.coupling_den,
            s.curve.coupling_den,
            CacheField::CouplingDen
        );
        write_curve_field!(
            applied,
            mode,
            record.scale_micro,
            s.curve.scale_micro,
            CacheField::CurveScale
        );

        write_field!(
            applied,
            record.last_synced_at,
            Some(s.observed_at),
            CacheField::LastSyncedAt
        );

        applied
    }
}
