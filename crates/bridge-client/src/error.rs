//! Bridge client error types.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur during bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// HTTP request failed at the transport level.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server rejected a side-channel call.
    #[error("bridge API error: {message} (status {status})")]
    Api { status: u16, message: String },

    /// Local validation failed before any network call was made.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The event stream subscription could not be established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The shared event stream has been lost. Retryable after reconnect.
    #[error("transport disconnected")]
    Disconnected,
}
