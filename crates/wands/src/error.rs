//! Error types for wands.

use axis_protocol::NegotiationError;
use thiserror::Error;

/// Wands error type.
#[derive(Error, Debug)]
pub enum WandsError {
    /// Remote fetch failed (transport failure, missing payload)
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Cache store could not serve or persist entries
    #[error("Cache error: {0}")]
    Cache(String),

    /// Cache store split a request into lists that do not partition it
    #[error("Cache contract violated: {0}")]
    CacheContract(String),

    /// Population service request failed
    #[error("Notification error: {0}")]
    Notification(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (cache files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache document (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for wands operations.
pub type WandsResult<T> = Result<T, WandsError>;
