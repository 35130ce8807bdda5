use thiserror::Error;

use crate::types::PoolId;

/// HTTP error classification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpErrorKind {
    #[error("Client error (code: {code:?}): {message}")]
    Client {
        code: Option<u16>,
        message: String,
        data: Option<String>,
    },
    #[error("Server error: {message}")]
    Server { message: String },
}

/// Errors raised at the numeric decode boundary.
///
/// Every wide integer coming off the ledger passes through
/// [`crate::types::decode_wide`], which only ever fails with one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("field `{field}` is empty")]
    Empty { field: &'static str },
    #[error("field `{field}` is not an unsigned integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("field `{field}` is negative: {value:?}")]
    Negative { field: &'static str, value: String },
    #[error("field `{field}` exceeds {bits} bits")]
    Overflow { field: &'static str, bits: u32 },
    #[error("invalid curve parameters: {0}")]
    InvalidCurve(String),
    #[error("invalid pool id: {0}")]
    PoolId(String),
    #[error("JSON error: {0}")]
    Json(String),
}

/// Main engine error type.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// HTTP error with status code and classification
    #[error("HTTP error (status {status}): {kind}")]
    Http { status: u16, kind: HttpErrorKind },

    /// Transport failure before a status code was received
    #[error("Generic request error: {0}")]
    GenericRequest(String),

    /// JSON parse error on a ledger response
    #[error("Json parse error: {0}")]
    JsonParse(String),

    /// Pool absent on the ledger
    #[error("Pool {pool_id} not found on ledger")]
    NotFound { pool_id: PoolId },

    /// Malformed numeric encoding
    #[error("Decode error: {0}")]
    Decode(#[from] ParseError),

    /// Settlement cooldown has not elapsed
    #[error("Settlement for pool {pool_id} too early: {remaining_secs}s of cooldown remaining")]
    TooEarly { pool_id: PoolId, remaining_secs: i64 },

    /// Network-bound operation exceeded the caller's budget
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// Vault/reserve invariant violated on the ledger
    #[error("Pool {pool_id} inconsistent: {detail}")]
    Inconsistent { pool_id: PoolId, detail: String },

    /// Ledger does not expose the requested capability
    #[error("Ledger does not support {0}")]
    Unsupported(&'static str),

    /// Cache store failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Create an HTTP client error
    pub fn client_error(
        status: u16,
        code: Option<u16>,
        message: String,
        data: Option<String>,
    ) -> Self {
        Error::Http {
            status,
            kind: HttpErrorKind::Client {
                code,
                message,
                data,
            },
        }
    }

    /// Create an HTTP server error
    pub fn server_error(status: u16, message: String) -> Self {
        Error::Http {
            status,
            kind: HttpErrorKind::Server { message },
        }
    }

    pub fn json_parse(msg: impl Into<String>) -> Self {
        Error::JsonParse(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    pub fn timeout(operation: &'static str, after: std::time::Duration) -> Self {
        Error::Timeout {
            operation,
            after_ms: after.as_millis() as u64,
        }
    }

    /// Whether a presentation read should degrade to "data unavailable"
    /// instead of surfacing the error.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::Timeout { .. }
                | Error::GenericRequest(_)
                | Error::Http { .. }
        )
    }
}
