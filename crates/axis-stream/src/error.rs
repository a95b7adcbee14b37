//! Error types for axis-stream.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur on a streaming channel.
#[derive(Error, Debug)]
pub enum StreamError {
    /// IO error (socket bind, connect, read, write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Deadline expired while opening or draining a channel
    #[error("timed out on channel '{channel}' after {after:?}")]
    Timeout { channel: String, after: Duration },

    /// Peer went away without closing the stream
    #[error("peer disconnected from channel '{0}'")]
    Disconnected(String),

    /// Operation on a channel that was already closed
    #[error("channel '{0}' is closed")]
    Closed(String),

    /// Put/get/end_step outside of a begin_step/end_step window
    #[error("no step in progress on channel '{0}'")]
    NotInStep(String),

    /// Variable was never declared, or carries no data in this step
    #[error("variable '{0}' is not available")]
    UnknownVariable(String),

    /// Receive buffer does not match the transferred data
    #[error("buffer mismatch for '{variable}': expected {expected}, got {actual}")]
    BufferMismatch {
        variable: String,
        expected: String,
        actual: String,
    },

    /// Malformed or out-of-order frames
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Every writer reached before the deadline served another channel
    #[error("writer rejected reader for channel '{0}'")]
    ChannelRejected(String),

    /// Array data inconsistent with its shape or element type
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
