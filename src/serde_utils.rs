//! Shared serialization helpers for wide integers.
//!
//! Cache documents carry reserves and sqrt prices as decimal strings so
//! that any JSON reader round-trips them without float coercion.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serializer};

/// `u128` as a decimal string.
pub mod u128_string {
    use super::*;

    pub fn serialize<S>(val: &u128, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&val.to_string())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(d)?;
        raw.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

/// `Option<u128>` as an optional decimal string.
pub mod opt_u128_string {
    use super::*;

    pub fn serialize<S>(val: &Option<u128>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match val {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<u128>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|r| r.parse::<u128>().map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// `U256` as a decimal string.
pub mod u256_string {
    use super::*;

    pub fn serialize<S>(val: &U256, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&val.to_string())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(d)?;
        U256::from_str_radix(&raw, 10).map_err(serde::de::Error::custom)
    }
}
