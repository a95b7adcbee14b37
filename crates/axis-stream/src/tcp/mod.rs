//! Networked transport over TCP.
//!
//! Mirrors a rendezvous-style streaming engine:
//!
//! ```text
//!   writer side                              reader side
//!   bind address:port                        connect address:port (retry)
//!   accept N readers   <──── HELLO(name) ──── announce channel
//!                      ──── HELLO_ACK ──────> accepted / rejected
//!   drop listener
//!   BEGIN_STEP .. END_STEP ───────────────────> begin_step() returns Ok
//!   CLOSE ────────────────────────────────────> begin_step() returns EndOfStream
//!   (reliable) wait   <──── CLOSE_ACK ─────────
//! ```
//!
//! All channels of a pairing share one port. That works because the
//! protocol opens them strictly one after another and a writer releases the
//! port as soon as its readers have joined.

mod reader;
mod writer;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::{ChannelReader, ChannelWriter, StreamTransport};
use crate::error::{StreamError, StreamResult};
use crate::params::ConnectionParams;
use crate::protocol::{declared_len, read_frame, Frame, MAX_FRAME_LEN};

/// Pause between connect/bind attempts while waiting for the peer.
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// TCP implementation of [`StreamTransport`].
#[derive(Debug, Clone)]
pub struct TcpTransport {
    params: ConnectionParams,
}

impl TcpTransport {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

#[async_trait]
impl StreamTransport for TcpTransport {
    async fn open_writer(&self, channel: &str) -> StreamResult<Box<dyn ChannelWriter>> {
        let writer = writer::open(&self.params, channel).await?;
        Ok(Box::new(writer))
    }

    async fn open_reader(&self, channel: &str) -> StreamResult<Box<dyn ChannelReader>> {
        let reader = reader::open(&self.params, channel).await?;
        Ok(Box::new(reader))
    }
}

/// Buffered frame reader over a byte stream.
pub(crate) struct FrameRead<R> {
    inner: R,
    channel: String,
    read_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameRead<R> {
    pub(crate) fn new(inner: R, channel: impl Into<String>) -> Self {
        Self {
            inner,
            channel: channel.into(),
            read_buf: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next frame, or `None` on a clean EOF between frames.
    ///
    /// Cancel-safe: bytes are only appended after a read completes.
    pub(crate) async fn next_frame(&mut self) -> StreamResult<Option<Frame>> {
        loop {
            // Try to parse a complete frame from the buffer
            if let Some((frame_data, consumed)) = read_frame(&self.read_buf) {
                let frame = Frame::decode(frame_data)?;
                self.read_buf.drain(..consumed);
                return Ok(Some(frame));
            }

            if let Some(len) = declared_len(&self.read_buf) {
                if len > MAX_FRAME_LEN {
                    return Err(StreamError::Protocol(format!(
                        "Frame of {} bytes exceeds limit of {}",
                        len, MAX_FRAME_LEN
                    )));
                }
            }

            // Need more data
            let mut chunk = vec![0u8; 64 * 1024];
            let n = self.inner.read(&mut chunk).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(StreamError::Disconnected(self.channel.clone()));
            }

            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> StreamResult<()> {
    writer.write_all(&frame.encode()?).await?;
    Ok(())
}

fn timeout_error(channel: &str, after: Duration) -> StreamError {
    StreamError::Timeout {
        channel: channel.to_string(),
        after,
    }
}
