//! Error types for catalog_sync

use thiserror::Error;

/// Unified error type for catalog_sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTTP error status code from a provider
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// Provider payload could not be mapped to the canonical shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Failed to parse a JSON response
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Provider name in the database is not a known provider key
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Result alias for catalog_sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
