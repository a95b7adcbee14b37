//! Reader helpers shared by both ends of the protocol.

use axis_stream::{ChannelReader, StepStatus, StreamError};
use tracing::{debug, warn};

use crate::error::NegotiationResult;

/// Consume steps until the writer closes the stream.
///
/// The writer's close handshake only completes once the reader has seen the
/// close marker, so every reader is drained before it is closed.
pub(crate) async fn drain_to_end(reader: &mut dyn ChannelReader) -> NegotiationResult<()> {
    loop {
        match reader.begin_step().await? {
            StepStatus::Ok => {
                debug!(channel = %reader.channel(), "Ignoring extra step");
                reader.end_step()?;
            }
            StepStatus::EndOfStream => return Ok(()),
            StepStatus::NotReady => return Err(not_ready(reader.channel()).into()),
        }
    }
}

/// Close a reader after a failed cycle, keeping the original error.
pub(crate) async fn abandon(reader: &mut dyn ChannelReader) {
    if let Err(e) = reader.close().await {
        warn!(channel = %reader.channel(), error = %e, "Failed to close reader");
    }
}

pub(crate) fn not_ready(channel: &str) -> StreamError {
    StreamError::Protocol(format!("no step on '{}' within the timeout", channel))
}
