//! Error types for the Touch Portal client.

use thiserror::Error;

/// Client error types.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to Touch Portal at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to Touch Portal lost: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Client is disconnected")]
    Disconnected,
}
