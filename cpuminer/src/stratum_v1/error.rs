//! Error types for Stratum v1 protocol.

use thiserror::Error;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format received from pool
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Unexpected response (wrong shape, missing fields)
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Pool sent `client.reconnect`
    #[error("Pool requested reconnect")]
    ReconnectRequested,

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,

    /// Timeout connecting or waiting for a response
    #[error("Timeout waiting for pool")]
    Timeout,
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
