//! Protocol and client constants.

/// Default ledger gateway endpoints.
pub const MAINNET_API_URL: &str = "https://api.pools.mainnet.example";
pub const DEVNET_API_URL: &str = "https://api.pools.devnet.example";
pub const LOCAL_API_URL: &str = "http://localhost:3001";

/// Floating point tolerance for display-path curve math.
pub const EPSILON: f64 = 1e-9;

/// Fixed-point exponent for square-root prices (Q64.96).
pub const Q96_SHIFT: usize = 96;

/// Decimal places of the settlement currency (micro units).
pub const CURRENCY_DECIMALS: u32 = 6;
pub const CURRENCY_SCALE: u128 = 1_000_000;

/// Decimal places of LONG/SHORT tokens (atomic units).
pub const TOKEN_DECIMALS: u32 = 6;
pub const TOKEN_SCALE: u128 = 1_000_000;

/// Price (micro-currency per whole token) reported for a side with no
/// usable sqrt price and no known curve scale: 1.0 in display units.
pub const DEFAULT_BOOTSTRAP_PRICE_MICRO: u128 = 1_000_000;

/// Relevance reported when both reserves are zero.
pub const NEUTRAL_RELEVANCE: f64 = 0.5;

/// Relevance / score precision (millionths).
pub const RELEVANCE_SCALE: u128 = 1_000_000;

/// Basis point denominator.
pub const BPS_DENOMINATOR: u128 = 10_000;

pub const SECONDS_PER_DAY: i64 = 86_400;
