use serde::{Deserialize, Serialize};

use crate::errors::ParseError;
use crate::types::{
    decode_wide, narrow_i64, narrow_u128, narrow_u32, CurveFields, CurveParams, PoolId,
    PoolSnapshot, WideValue,
};

/// Pool state as the ledger gateway returns it. Numbers are undecoded.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStateResponse {
    pub pool_id: PoolId,
    pub supply_long: WideValue,
    pub supply_short: WideValue,
    pub reserve_long: WideValue,
    pub reserve_short: WideValue,
    #[serde(rename = "sqrtPriceLongX96")]
    pub sqrt_price_long_x96: WideValue,
    #[serde(rename = "sqrtPriceShortX96")]
    pub sqrt_price_short_x96: WideValue,
    pub vault_balance: WideValue,
    pub last_settle_ts: WideValue,
    pub min_settle_interval: WideValue,
    #[serde(default)]
    pub expiration_ts: Option<WideValue>,
    pub last_decay_update: WideValue,
    #[serde(default)]
    pub curve_exponent: Option<WideValue>,
    #[serde(default)]
    pub coupling_numerator: Option<WideValue>,
    #[serde(default)]
    pub coupling_denominator: Option<WideValue>,
    #[serde(default)]
    pub curve_scale: Option<WideValue>,
    /// Unix seconds of the block the state was read at, when reported.
    #[serde(default)]
    pub observed_at: Option<WideValue>,
}

/// Supplies stay within 64 bits so curve math never overflows 256.
fn supply(field: &'static str, raw: &WideValue) -> Result<u128, ParseError> {
    let value = decode_wide(field, raw)?;
    if value.bit_len() > 64 {
        return Err(ParseError::Overflow { field, bits: 64 });
    }
    narrow_u128(field, value)
}

fn amount(field: &'static str, raw: &WideValue) -> Result<u128, ParseError> {
    narrow_u128(field, decode_wide(field, raw)?)
}

/// Sqrt prices above 128 bits would overflow the squaring in decode.
fn sqrt_price(field: &'static str, raw: &WideValue) -> Result<alloy::primitives::U256, ParseError> {
    let value = decode_wide(field, raw)?;
    if value.bit_len() > 128 {
        return Err(ParseError::Overflow { field, bits: 128 });
    }
    Ok(value)
}

fn timestamp(field: &'static str, raw: &WideValue) -> Result<i64, ParseError> {
    narrow_i64(field, decode_wide(field, raw)?)
}

fn optional<T>(
    field: &'static str,
    raw: &Option<WideValue>,
    decode: impl Fn(&'static str, &WideValue) -> Result<T, ParseError>,
) -> Result<Option<T>, ParseError> {
    raw.as_ref().map(|r| decode(field, r)).transpose()
}

fn small(field: &'static str, raw: &WideValue) -> Result<u32, ParseError> {
    narrow_u32(field, decode_wide(field, raw)?)
}

impl PoolStateResponse {
    /// Decode every numeric field exactly once.
    ///
    /// `fallback_observed_at` stamps the snapshot when the ledger did not
    /// report its own read time.
    pub fn into_snapshot(self, fallback_observed_at: i64) -> Result<PoolSnapshot, ParseError> {
        let curve = CurveFields {
            exponent: optional("curveExponent", &self.curve_exponent, small)?,
            coupling_num: optional("couplingNumerator", &self.coupling_numerator, small)?,
            coupling_den: optional("couplingDenominator", &self.coupling_denominator, small)?,
            scale_micro: optional("curveScale", &self.curve_scale, amount)?,
        };
        curve
            .resolve(&CurveParams::default())
            .validate()
            .map_err(ParseError::InvalidCurve)?;

        Ok(PoolSnapshot {
            pool_id: self.pool_id,
            supply_long: supply("supplyLong", &self.supply_long)?,
            supply_short: supply("supplyShort", &self.supply_short)?,
            reserve_long: amount("reserveLong", &self.reserve_long)?,
            reserve_short: amount("reserveShort", &self.reserve_short)?,
            sqrt_price_long_x96: sqrt_price("sqrtPriceLongX96", &self.sqrt_price_long_x96)?,
            sqrt_price_short_x96: sqrt_price("sqrtPriceShortX96", &self.sqrt_price_short_x96)?,
            curve,
            vault_balance: amount("vaultBalance", &self.vault_balance)?,
            last_settle_ts: timestamp("lastSettleTs", &self.last_settle_ts)?,
            min_settle_interval: timestamp("minSettleInterval", &self.min_settle_interval)?,
            expiration_ts: optional("expirationTs", &self.expiration_ts, timestamp)?,
            last_decay_update: timestamp("lastDecayUpdate", &self.last_decay_update)?,
            observed_at: optional("observedAt", &self.observed_at, timestamp)?
                .unwrap_or(fallback_observed_at),
        })
    }

    /// Wire form of a decoded snapshot, used by test doubles and fixtures.
    pub fn from_snapshot(snapshot: &PoolSnapshot) -> Self {
        Self {
            pool_id: snapshot.pool_id,
            supply_long: snapshot.supply_long.into(),
            supply_short: snapshot.supply_short.into(),
            reserve_long: snapshot.reserve_long.into(),
            reserve_short: snapshot.reserve_short.into(),
            sqrt_price_long_x96: snapshot.sqrt_price_long_x96.into(),
            sqrt_price_short_x96: snapshot.sqrt_price_short_x96.into(),
            vault_balance: snapshot.vault_balance.into(),
            last_settle_ts: WideValue::Unsigned(snapshot.last_settle_ts.max(0) as u64),
            min_settle_interval: WideValue::Unsigned(snapshot.min_settle_interval.max(0) as u64),
            expiration_ts: snapshot
                .expiration_ts
                .map(|t| WideValue::Unsigned(t.max(0) as u64)),
            last_decay_update: WideValue::Unsigned(snapshot.last_decay_update.max(0) as u64),
            curve_exponent: snapshot.curve.exponent.map(|v| WideValue::Unsigned(v.into())),
            coupling_numerator: snapshot.curve.coupling_num.map(|v| WideValue::Unsigned(v.into())),
            coupling_denominator: snapshot
                .curve
                .coupling_den
                .map(|v| WideValue::Unsigned(v.into())),
            curve_scale: snapshot.curve.scale_micro.map(WideValue::from),
            observed_at: Some(WideValue::Unsigned(snapshot.observed_at.max(0) as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "poolId": format!("{}", PoolId::repeat_byte(0x11)),
            "supplyLong": "710000000",
            "supplyShort": 1575000000u64,
            "reserveLong": "291788000",
            "reserveShort": "0x56c8a5d0",
            "sqrtPriceLongX96": "50791760082160869486549876736",
            "sqrtPriceShortX96": "75656305434432233098036772864",
            "vaultBalance": "1727636000",
            "lastSettleTs": 1700000000u64,
            "minSettleInterval": "3600",
            "lastDecayUpdate": 0,
            "curveScale": "1000000"
        })
    }

    #[test]
    fn test_decode_mixed_encodings() {
        let response: PoolStateResponse = serde_json::from_value(sample_json()).unwrap();
        let snap = response.into_snapshot(42).unwrap();
        assert_eq!(snap.supply_long, 710_000_000);
        assert_eq!(snap.supply_short, 1_575_000_000);
        assert_eq!(snap.reserve_short, 0x56c8a5d0);
        assert_eq!(snap.curve.scale_micro, Some(1_000_000));
        assert_eq!(snap.curve.exponent, None);
        assert_eq!(snap.expiration_ts, None);
        assert_eq!(snap.observed_at, 42);
        assert_eq!(
            snap.sqrt_price_long_x96,
            U256::from_str_radix("50791760082160869486549876736", 10).unwrap()
        );
    }

    #[test]
    fn test_oversized_sqrt_price_rejected() {
        let mut json = sample_json();
        json["sqrtPriceLongX96"] = serde_json::json!((U256::from(1u8) << 130usize).to_string());
        let response: PoolStateResponse = serde_json::from_value(json).unwrap();
        assert_eq!(
            response.into_snapshot(0).unwrap_err(),
            ParseError::Overflow {
                field: "sqrtPriceLongX96",
                bits: 128
            }
        );
    }

    #[test]
    fn test_float_supply_rejected() {
        let mut json = sample_json();
        json["supplyLong"] = serde_json::json!(7.5);
        let response: PoolStateResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            response.into_snapshot(0),
            Err(ParseError::InvalidInteger { field: "supplyLong", .. })
        ));
    }

    #[test]
    fn test_invalid_curve_rejected() {
        let mut json = sample_json();
        json["couplingDenominator"] = serde_json::json!(0);
        let response: PoolStateResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            response.into_snapshot(0),
            Err(ParseError::InvalidCurve(_))
        ));
    }

    #[test]
    fn test_snapshot_wire_round_trip() {
        let response: PoolStateResponse = serde_json::from_value(sample_json()).unwrap();
        let snap = response.into_snapshot(7).unwrap();
        let again = PoolStateResponse::from_snapshot(&snap)
            .into_snapshot(0)
            .unwrap();
        assert_eq!(again, snap);
    }
}
