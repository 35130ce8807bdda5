//! Structured logging setup.
//!
//! Stdout logging in one of three formats, optionally mirrored to daily
//! rolling files:
//!
//! | File | Contents |
//! |------|----------|
//! | `pools-operational.log` | everything at `operational_level` and above |
//! | `pools-discrepancies.log` | reconcile and reserve warnings only |
//!
//! ```bash
//! # Trace single-flight and store activity only
//! RUST_LOG=warn,bonding_surface::engine::reconcile=trace pool_sync sync 0x...
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Noisy dependencies held at warn unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &str = "hyper=warn,reqwest=warn,rustls=warn";

const DISCREPANCY_FILTER: &str = "bonding_surface::engine::reconcile=warn,\
                                  bonding_surface::engine::reserve=warn,\
                                  bonding_surface::engine::math=warn";

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON format (for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LogConfig {
    /// Base level when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Mirror logs into daily rolling files under `log_dir`
    #[serde(default)]
    pub enable_files: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Level for the operational file
    #[serde(default = "default_level")]
    pub operational_level: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            enable_files: false,
            log_dir: default_log_dir(),
            operational_level: default_level(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), String> {
        let levels = [
            ("level", &self.level),
            ("operational_level", &self.operational_level),
        ];
        for (name, level) in levels {
            EnvFilter::try_new(level).map_err(|e| format!("logging.{name} '{level}': {e}"))?;
        }
        if self.enable_files && self.log_dir.as_os_str().is_empty() {
            return Err("logging.log_dir must be set when enable_files is true".to_string());
        }
        Ok(())
    }
}

fn filter_with_quiet_dependencies(level: &str) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    Ok(EnvFilter::try_new(format!("{level},{QUIET_DEPENDENCIES}"))?)
}

/// Initialize the global subscriber.
///
/// Keep the returned guards alive for the life of the process; dropping
/// them stops file output from being flushed.
pub fn init_logging(
    config: &LogConfig,
    env_filter_override: Option<&str>,
) -> Result<Vec<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut guards = Vec::new();

    let base_filter = match env_filter_override {
        Some(filter) => EnvFilter::try_new(filter)?,
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => filter_with_quiet_dependencies(&config.level)?,
        },
    };

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer().json().with_filter(base_filter).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_filter(base_filter).boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_filter(base_filter)
            .boxed(),
    };

    if !config.enable_files {
        tracing_subscriber::registry().with(stdout_layer).try_init()?;
        return Ok(guards);
    }

    std::fs::create_dir_all(&config.log_dir)?;

    let operational_appender =
        RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "pools-operational.log");
    let (operational_writer, guard) = tracing_appender::non_blocking(operational_appender);
    guards.push(guard);
    let operational_layer = fmt::layer()
        .with_writer(operational_writer)
        .with_ansi(false)
        .json()
        .with_filter(filter_with_quiet_dependencies(&config.operational_level)?);

    let discrepancy_appender =
        RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "pools-discrepancies.log");
    let (discrepancy_writer, guard) = tracing_appender::non_blocking(discrepancy_appender);
    guards.push(guard);
    let discrepancy_layer = fmt::layer()
        .with_writer(discrepancy_writer)
        .with_ansi(false)
        .json()
        .with_filter(EnvFilter::try_new(DISCREPANCY_FILTER)?);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(operational_layer)
        .with(discrepancy_layer)
        .try_init()?;

    eprintln!("File logging enabled: {}", config.log_dir.display());
    Ok(guards)
}
