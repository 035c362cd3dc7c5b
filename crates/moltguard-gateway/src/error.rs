//! Error types for the gateway.

use std::net::SocketAddr;

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    /// The service bound but never became ready.
    #[error("gateway startup failed: {0}")]
    Startup(String),

    /// The upstream provider could not be reached.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Storage error while logging an analysis.
    #[error("storage error: {0}")]
    Storage(#[from] moltguard_storage::StorageError),

    /// Guard pipeline error.
    #[error("guard error: {0}")]
    Guard(#[from] moltguard_core::GuardError),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
