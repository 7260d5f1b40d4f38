//! Error type shared by all exchange adapters.

use thiserror::Error;

/// Failure of a single adapter call.
///
/// Every variant is recoverable from the engine's point of view: the affected
/// exchange is skipped for the current cycle and retried on the next one.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{exchange} API error: {message}")]
    Api { exchange: String, message: String },

    #[error("{exchange}: cannot parse response - {message}")]
    Parse { exchange: String, message: String },

    #[error("{exchange}: invalid order book - {reason}")]
    InvalidOrderBook { exchange: String, reason: String },

    #[error("{exchange} does not trade {pair}")]
    UnsupportedPair { exchange: String, pair: String },

    #[error("{exchange} does not support {operation}")]
    Unsupported { exchange: String, operation: String },

    #[error("{exchange}: {operation} timed out")]
    Timeout { exchange: String, operation: String },

    #[error("{exchange}: {operation} task failed - {reason}")]
    TaskFailed {
        exchange: String,
        operation: String,
        reason: String,
    },

    #[error("{exchange}: missing deposit address for {currency}")]
    MissingAddress { exchange: String, currency: String },

    #[error("insufficient {currency} balance on {exchange}")]
    InsufficientBalance { exchange: String, currency: String },

    #[error("invalid currency pair: {0}")]
    InvalidPair(String),

    #[error("invalid order side: {0}")]
    InvalidSide(String),
}

impl ExchangeError {
    pub(crate) fn api(exchange: &str, message: impl Into<String>) -> Self {
        Self::Api {
            exchange: exchange.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn parse(exchange: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            exchange: exchange.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_pair(exchange: &str, pair: impl ToString) -> Self {
        Self::UnsupportedPair {
            exchange: exchange.to_string(),
            pair: pair.to_string(),
        }
    }

    pub(crate) fn unsupported(exchange: &str, operation: &str) -> Self {
        Self::Unsupported {
            exchange: exchange.to_string(),
            operation: operation.to_string(),
        }
    }
}
