//! Pool sync and inspection tool.
//!
//! Reads pools from the ledger gateway, reconciles them into the local
//! cache, and prints views, quotes and settlement/decay previews as JSON.
//! Nothing here writes to the ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use bonding_surface::engine::infra::{init_logging, LogFormat};
use bonding_surface::engine::math::micro_to_display;
use bonding_surface::engine::reserve::ReserveModel;
use bonding_surface::engine::{
    score_to_micro, CacheBackend, CacheStore, DecayEngine, EngineConfig, InMemoryCache,
    JsonFileCache, PoolViewService, Reconciler, SettlementEngine,
};
use bonding_surface::{
    unix_now, LedgerClient, LedgerReader, PoolId, Side, CURRENCY_SCALE, TOKEN_SCALE,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "pool_sync")]
#[command(version, about = "Bonding-surface pool sync and inspection", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pool_sync.toml")]
    config: String,

    /// Override network (mainnet, devnet, localhost, or a URL)
    #[arg(long, env = "POOL_LEDGER_URL")]
    network: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Evaluate decay and cooldowns at this RFC 3339 instant instead of now
    #[arg(long)]
    at: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cached pool views, syncing pools that are not cached yet
    Show { pools: Vec<String> },
    /// Reconcile pools from the ledger into the cache
    Sync {
        pools: Vec<String>,
        /// Print reconcile counters in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
    /// Overwrite every cached field of a pool from the ledger
    ForceResync { pool: String },
    /// Quote buying `side` with `amount` of currency
    QuoteBuy {
        pool: String,
        side: Side,
        amount: f64,
    },
    /// Quote selling `tokens` of `side`
    QuoteSell {
        pool: String,
        side: Side,
        tokens: f64,
    },
    /// Preview a settlement against a realized score in [0, 1]
    SettlePreview { pool: String, score: f64 },
    /// Project post-expiration decay
    Decay { pool: String },
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "pool_sync.toml")]
        output: String,
    },
    /// Validate config without running
    ValidateConfig,
}

// ============================================================================
// Wiring
// ============================================================================

struct Services {
    reader: LedgerReader,
    reconciler: Reconciler,
    views: PoolViewService,
    decay: DecayEngine,
    settlement: SettlementEngine,
    config: EngineConfig,
}

fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(network) = &cli.network {
        config.ledger.network = network.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = match format.as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            "pretty" => LogFormat::Pretty,
            other => return Err(format!("unknown log format '{other}'").into()),
        };
    }
    config.validate()?;
    Ok(config)
}

fn build(config: EngineConfig) -> Result<Services, Box<dyn std::error::Error>> {
    let ledger = &config.ledger;
    let client = LedgerClient::new(None, Some(ledger.base_url()?))
        .with_capabilities(ledger.supports_batch, ledger.supports_simulation);
    let reader = LedgerReader::new(Arc::new(client)).with_max_concurrency(ledger.max_concurrency);

    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(InMemoryCache::new()),
        CacheBackend::JsonFile => Arc::new(JsonFileCache::open(&config.cache.path)?),
    };

    let reconciler = Reconciler::new(reader.clone(), store.clone())
        .with_price_tolerance_bps(config.reconcile.price_tolerance_bps);
    let decay =
        DecayEngine::new(config.decay).with_ledger(reader.clone(), ledger.request_timeout());
    let views = PoolViewService::new(store, decay.clone())
        .with_read_through(reconciler.clone(), config.reconcile.timeout());

    Ok(Services {
        reader,
        reconciler,
        views,
        decay,
        settlement: SettlementEngine::new(config.settlement),
        config,
    })
}

fn parse_pool(raw: &str) -> Result<PoolId, String> {
    raw.parse::<PoolId>()
        .map_err(|e| format!("invalid pool id '{raw}': {e}"))
}

fn parse_pools(raw: &[String]) -> Result<Vec<PoolId>, String> {
    raw.iter().map(|p| parse_pool(p)).collect()
}

fn evaluation_time(cli: &Cli) -> Result<i64, Box<dyn std::error::Error>> {
    match &cli.at {
        Some(at) => Ok(DateTime::parse_from_rfc3339(at)?.timestamp()),
        None => Ok(unix_now()),
    }
}

/// Display units to integer micro units, rejecting negatives and NaN.
fn to_micro(value: f64, scale: u128, what: &str) -> Result<u128, String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{what} must be a non-negative number, got {value}"));
    }
    Ok((value * scale as f64).round() as u128)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteReport<Q> {
    pool_id: PoolId,
    generated_at: String,
    quote: Q,
    average_price: Option<f64>,
    price_before: f64,
    price_after: f64,
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = EngineConfig::default();
    let content = toml::to_string_pretty(&sample)?;

    let with_comments = format!(
        r#"# Bonding-surface pool sync configuration
# See: pool_sync --help
# POOL_LEDGER_URL overrides [ledger].network

{}"#,
        content
    );

    std::fs::write(path, with_comments)?;
    println!("Sample config written to: {}", path);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (before parsing CLI args)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        Commands::GenerateConfig { output } => return generate_sample_config(output),
        Commands::ValidateConfig => {
            let config = load_config(&cli)?;
            println!("Configuration is valid:\n{:#?}", config);
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let _log_guards = init_logging(&config.logging, None)?;
    let now = evaluation_time(&cli)?;
    let services = build(config)?;
    let budget = services.config.reconcile.timeout();

    match &cli.command {
        Commands::Show { pools } => {
            let views = services.views.view_many(&parse_pools(pools)?, now).await;
            let views: Vec<_> = views.into_iter().map(|(_, display)| display).collect();
            print_json(&views)?;
        }
        Commands::Sync { pools, metrics } => {
            let ids = parse_pools(pools)?;
            let outcomes = futures_util::future::join_all(
                ids.iter().map(|id| services.reconciler.sync(*id, budget)),
            )
            .await;
            let applied = outcomes.iter().filter(|o| o.is_applied()).count();
            info!(requested = ids.len(), applied, "Sync finished");
            print_json(&outcomes)?;
            if *metrics {
                eprint!("{}", services.reconciler.metrics().to_prometheus_text());
            }
        }
        Commands::ForceResync { pool } => {
            let outcome = services.reconciler.force_resync(parse_pool(pool)?, budget).await?;
            print_json(&outcome)?;
        }
        Commands::QuoteBuy { pool, side, amount } => {
            let snapshot = services.reader.fetch(parse_pool(pool)?, budget).await?;
            let model = ReserveModel::for_snapshot(&snapshot);
            let currency_in = to_micro(*amount, CURRENCY_SCALE, "amount")?;
            let quote = model.quote_buy(&snapshot, *side, currency_in)?;
            print_json(&QuoteReport {
                pool_id: snapshot.pool_id,
                generated_at: Utc::now().to_rfc3339(),
                average_price: quote.average_price_micro().map(|p| p as f64 / 1e6),
                price_before: micro_to_display(quote.price_before_micro),
                price_after: micro_to_display(quote.price_after_micro),
                quote,
            })?;
        }
        Commands::QuoteSell { pool, side, tokens } => {
            let snapshot = services.reader.fetch(parse_pool(pool)?, budget).await?;
            let model = ReserveModel::for_snapshot(&snapshot);
            let tokens_in = to_micro(*tokens, TOKEN_SCALE, "tokens")?;
            let quote = model.quote_sell(&snapshot, *side, tokens_in)?;
            print_json(&QuoteReport {
                pool_id: snapshot.pool_id,
                generated_at: Utc::now().to_rfc3339(),
                average_price: quote.average_price_micro().map(|p| p as f64 / 1e6),
                price_before: micro_to_display(quote.price_before_micro),
                price_after: micro_to_display(quote.price_after_micro),
                quote,
            })?;
        }
        Commands::SettlePreview { pool, score } => {
            let snapshot = services.reader.fetch(parse_pool(pool)?, budget).await?;
            let outcome = services.settlement.settle(&snapshot, score_to_micro(*score), now)?;
            print_json(&outcome)?;
        }
        Commands::Decay { pool } => {
            let snapshot = services.reader.fetch(parse_pool(pool)?, budget).await?;
            print_json(&services.decay.project(&snapshot, now).await)?;
        }
        Commands::GenerateConfig { .. } | Commands::ValidateConfig => {}
    }

    Ok(())
}
