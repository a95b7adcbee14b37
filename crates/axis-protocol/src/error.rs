//! Error types for axis negotiation.

use axis_stream::StreamError;
use thiserror::Error;

/// Errors that can end a negotiation cycle.
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// Producer acknowledged the request negatively. Recoverable: the
    /// name is simply absent.
    #[error("axis not found: {0}")]
    AxisNotFound(String),

    /// Channel open, step or close failed. Fatal for the cycle.
    #[error("transport error: {0}")]
    Transport(#[from] StreamError),

    /// Acknowledged as found, but the data stream ended without a payload
    #[error("axis '{0}' was acknowledged but no payload arrived")]
    MissingPayload(String),

    /// Producer-side dataset store failure
    #[error("source store error: {0}")]
    Source(String),
}

impl NegotiationError {
    /// Whether this error only means "the name does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, NegotiationError::AxisNotFound(_))
    }
}

/// Result type for negotiation operations.
pub type NegotiationResult<T> = Result<T, NegotiationError>;
