//! Error types for Gatekeep.

use thiserror::Error;

/// Main error type for Gatekeep operations.
///
/// Blocked attempts are never reported through this type; they surface as a
/// [`RateLimitResult`](crate::ratelimit::RateLimitResult) with `allowed == false`.
#[derive(Error, Debug)]
pub enum GatekeepError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An endpoint name that has no registered policy
    #[error("Unknown rate limit endpoint: {0}")]
    UnknownEndpoint(String),

    /// Key-value store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeep operations.
pub type Result<T> = std::result::Result<T, GatekeepError>;
