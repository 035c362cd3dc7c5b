//! Error types for the guard pipeline.

use thiserror::Error;

/// Guard pipeline error type.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Every chunk of a target failed analysis. Callers treat this as
    /// fail-open: content passes, nothing is blocked.
    #[error("detection service unavailable: all {chunks} chunk(s) failed")]
    DetectionUnavailable {
        /// Number of chunks that were attempted.
        chunks: usize,
    },

    /// The detection service rejected the API key.
    #[error("authentication rejected by detection service: {0}")]
    Authentication(String),

    /// Auto-registration with the detection service failed.
    #[error("registration failed: {0}")]
    Registration(String),

    /// A single chunk request failed after retry.
    #[error("chunk analysis failed: {0}")]
    ChunkFailed(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (credentials file handling).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Credentials could not be resolved.
    #[error("credential error: {0}")]
    Credential(String),
}

/// Result type for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
