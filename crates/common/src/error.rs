use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport or API failure talking to the exchange. `retryable` comes
    /// from the adapter (5xx / timeouts yes, 4xx no).
    #[error("Exchange API error: {message}")]
    Exchange {
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },

    /// The gateway token bucket is empty or the exchange returned 429/418.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Repeated exchange failures above the escalation threshold.
    #[error("Exchange unreachable: {0}")]
    ExchangeUnreachable(String),

    /// A close for this symbol is already in flight.
    #[error("Close already in progress for {symbol}")]
    CloseInProgress { symbol: String },

    /// Local/exchange state disagreement outside reconciler tolerance,
    /// or an attempted second open for a symbol.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// A risk rule refused the operation (limits reached, opens halted).
    #[error("Risk violation: {0}")]
    RiskViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn exchange(message: impl Into<String>) -> Self {
        Error::Exchange {
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    pub fn exchange_retryable(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::Exchange {
            message: message.into(),
            retryable: true,
            retry_after,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Exchange {
                retryable: true,
                ..
            } | Error::RateLimited { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Exchange { retry_after, .. } => *retry_after,
            Error::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
