//! File configuration for the pool engine.
//!
//! Every section is optional in TOML; missing keys take the defaults below.
//! Curve parameters are per pool and come from the ledger, not from here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::decay::DecayParams;
use super::infra::LogConfig;
use super::settlement::SettlementParams;
use crate::consts::BPS_DENOMINATOR;
use crate::ledger::DEFAULT_MAX_CONCURRENT_FETCHES;
use crate::{BaseUrl, Error};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub decay: DecayParams,
    #[serde(default)]
    pub settlement: SettlementParams,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl EngineConfig {
    /// Read `path`, or return defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), String> {
        self.ledger.validate()?;
        self.cache.validate()?;
        self.decay.validate().map_err(|e| format!("decay: {e}"))?;
        self.settlement
            .validate()
            .map_err(|e| format!("settlement: {e}"))?;
        self.reconcile.validate()?;
        self.logging.validate()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LedgerConfig {
    /// mainnet, devnet, localhost, or an http(s) URL
    #[serde(default = "default_network")]
    pub network: String,

    /// Budget for a single ledger read
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Parallel single-pool reads when the batch call is unavailable
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_true")]
    pub supports_batch: bool,

    #[serde(default = "default_true")]
    pub supports_simulation: bool,
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENT_FETCHES
}

fn default_true() -> bool {
    true
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            request_timeout_ms: default_request_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            supports_batch: true,
            supports_simulation: true,
        }
    }
}

impl LedgerConfig {
    pub fn base_url(&self) -> Result<BaseUrl, String> {
        BaseUrl::parse(&self.network)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.base_url().map_err(|e| format!("ledger.network: {e}"))?;
        if self.request_timeout_ms == 0 {
            return Err("ledger.request_timeout_ms must be > 0".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("ledger.max_concurrency must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    JsonFile,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Document path for the `json_file` backend
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/pools.json")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: default_cache_path(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.backend == CacheBackend::JsonFile && self.path.as_os_str().is_empty() {
            return Err("cache.path must be set for the json_file backend".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReconcileConfig {
    /// Whole-operation budget for one sync, fetch included
    #[serde(default = "default_reconcile_timeout_ms")]
    pub timeout_ms: u64,

    /// Ledger/curve price gap that raises a discrepancy flag
    #[serde(default = "default_price_tolerance_bps")]
    pub price_tolerance_bps: u32,
}

fn default_reconcile_timeout_ms() -> u64 {
    3_000
}

fn default_price_tolerance_bps() -> u32 {
    50
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_reconcile_timeout_ms(),
            price_tolerance_bps: default_price_tolerance_bps(),
        }
    }
}

impl ReconcileConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("reconcile.timeout_ms must be > 0".to_string());
        }
        if u128::from(self.price_tolerance_bps) > BPS_DENOMINATOR {
            return Err(format!(
                "reconcile.price_tolerance_bps must be <= {BPS_DENOMINATOR}"
            ));
        }
        Ok(())
    }
}
