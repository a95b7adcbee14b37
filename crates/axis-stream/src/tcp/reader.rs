//! Reader side: connect (retrying until the writer is up), announce the
//! channel, then pull frames.

use std::io::ErrorKind;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use super::{timeout_error, write_frame, FrameRead, RETRY_INTERVAL};
use crate::error::{StreamError, StreamResult};
use crate::params::{ConnectionParams, TransportMode};
use crate::protocol::Frame;
use crate::step::{FrameSource, StepReader};

pub(super) async fn open(
    params: &ConnectionParams,
    channel: &str,
) -> StreamResult<StepReader<TcpSource>> {
    let deadline = Instant::now() + params.timeout;
    let mut rejected = false;

    let connected = timeout_at(deadline, connect(params, channel, &mut rejected)).await;
    let source = match connected {
        Ok(source) => source?,
        Err(_) if rejected => return Err(StreamError::ChannelRejected(channel.to_string())),
        Err(_) => return Err(timeout_error(channel, params.timeout)),
    };

    Ok(StepReader::new(channel, source, params.timeout))
}

/// Sets `rejected` once a writer has turned this channel away.
async fn connect(
    params: &ConnectionParams,
    channel: &str,
    rejected: &mut bool,
) -> StreamResult<TcpSource> {
    let endpoint = params.endpoint();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        match TcpStream::connect(&endpoint).await {
            Ok(stream) => match handshake(stream, channel).await {
                Ok(Some((frames, write_half))) => {
                    debug!(channel = %channel, endpoint = %endpoint, attempts, "Joined writer");
                    return Ok(TcpSource {
                        mode: params.transport_mode,
                        frames,
                        write_half,
                    });
                }
                Ok(None) => {
                    *rejected = true;
                    trace!(channel = %channel, "Writer serves another channel, retrying");
                }
                Err(e) => trace!(channel = %channel, error = %e, "Handshake failed, retrying"),
            },
            Err(e) if is_retryable(e.kind()) => {
                trace!(channel = %channel, endpoint = %endpoint, "Writer not up yet");
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Returns `None` if the writer rejected this channel.
async fn handshake(
    stream: TcpStream,
    channel: &str,
) -> StreamResult<Option<(FrameRead<OwnedReadHalf>, OwnedWriteHalf)>> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FrameRead::new(read_half, channel);

    write_frame(
        &mut write_half,
        &Frame::Hello {
            channel: channel.to_string(),
        },
    )
    .await?;

    match frames.next_frame().await? {
        Some(Frame::HelloAck { accepted: true }) => Ok(Some((frames, write_half))),
        Some(Frame::HelloAck { accepted: false }) => Ok(None),
        Some(other) => Err(StreamError::Protocol(format!(
            "expected HELLO_ACK on '{}', got frame {:#04x}",
            channel,
            other.frame_type()
        ))),
        None => Err(StreamError::Disconnected(channel.to_string())),
    }
}

fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

pub(crate) struct TcpSource {
    mode: TransportMode,
    frames: FrameRead<OwnedReadHalf>,
    write_half: OwnedWriteHalf,
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn recv(&mut self) -> StreamResult<Option<Frame>> {
        self.frames.next_frame().await
    }

    async fn acknowledge_close(&mut self) -> StreamResult<()> {
        if self.mode == TransportMode::Reliable {
            write_frame(&mut self.write_half, &Frame::CloseAck).await?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.write_half.shutdown().await;
    }
}
