//! Writer side: bind, rendezvous with readers, fan frames out.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::{timeout_error, write_frame, FrameRead, RETRY_INTERVAL};
use crate::error::{StreamError, StreamResult};
use crate::params::{ConnectionParams, TransportMode};
use crate::protocol::Frame;
use crate::step::{FrameSink, StepWriter};

/// Frames queued ahead of the background writer task.
const OUTBOUND_QUEUE: usize = 64;

pub(super) async fn open(
    params: &ConnectionParams,
    channel: &str,
) -> StreamResult<StepWriter<TcpSink>> {
    let deadline = Instant::now() + params.timeout;
    let expired = || timeout_error(channel, params.timeout);

    let listener = timeout_at(deadline, bind(params))
        .await
        .map_err(|_| expired())??;

    let mut readers = Vec::with_capacity(params.rendezvous_reader_count);
    let mut writers = Vec::with_capacity(params.rendezvous_reader_count);

    while readers.len() < params.rendezvous_reader_count {
        let (stream, peer) = timeout_at(deadline, listener.accept())
            .await
            .map_err(|_| expired())??;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        let mut frames = FrameRead::new(read_half, channel);

        let hello = timeout_at(deadline, frames.next_frame())
            .await
            .map_err(|_| expired())?;

        match hello {
            Ok(Some(Frame::Hello { channel: wanted })) if wanted == channel => {
                write_frame(&mut write_half, &Frame::HelloAck { accepted: true }).await?;
                debug!(channel = %channel, peer = %peer, "Reader joined");
                readers.push(frames);
                writers.push(write_half);
            }
            Ok(Some(Frame::Hello { channel: wanted })) => {
                debug!(
                    channel = %channel,
                    wanted = %wanted,
                    peer = %peer,
                    "Rejecting reader for another channel"
                );
                let _ = write_frame(&mut write_half, &Frame::HelloAck { accepted: false }).await;
            }
            Ok(other) => {
                warn!(channel = %channel, peer = %peer, frame = ?other, "Reader skipped hello");
            }
            Err(e) => {
                warn!(channel = %channel, peer = %peer, error = %e, "Reader handshake failed");
            }
        }
    }

    // Free the port for the next channel of this pairing
    drop(listener);

    debug!(
        channel = %channel,
        readers = readers.len(),
        threading = params.threading,
        mode = %params.transport_mode,
        "Writer rendezvous complete"
    );

    let sink = TcpSink::new(channel, params, readers, writers);
    Ok(StepWriter::new(channel, sink))
}

async fn bind(params: &ConnectionParams) -> StreamResult<TcpListener> {
    let endpoint = params.endpoint();
    let addr = lookup_host(&endpoint)
        .await?
        .next()
        .ok_or_else(|| StreamError::Protocol(format!("No address for {}", endpoint)))?;

    loop {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;

        match socket.bind(addr) {
            Ok(()) => return Ok(socket.listen(16)?),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                trace!(endpoint = %endpoint, "Port busy, retrying bind");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

enum Outbound {
    Inline(Vec<OwnedWriteHalf>),
    Threaded {
        queue: mpsc::Sender<Vec<u8>>,
        pump: JoinHandle<StreamResult<Vec<OwnedWriteHalf>>>,
    },
    Finished,
}

/// Fans encoded frames out to every joined reader.
pub(crate) struct TcpSink {
    channel: String,
    mode: TransportMode,
    timeout: Duration,
    readers: Vec<FrameRead<OwnedReadHalf>>,
    outbound: Outbound,
}

impl TcpSink {
    fn new(
        channel: &str,
        params: &ConnectionParams,
        readers: Vec<FrameRead<OwnedReadHalf>>,
        writers: Vec<OwnedWriteHalf>,
    ) -> Self {
        let outbound = if params.threading {
            let (queue, rx) = mpsc::channel(OUTBOUND_QUEUE);
            let pump = tokio::spawn(pump(channel.to_string(), rx, writers));
            Outbound::Threaded { queue, pump }
        } else {
            Outbound::Inline(writers)
        };

        Self {
            channel: channel.to_string(),
            mode: params.transport_mode,
            timeout: params.timeout,
            readers,
            outbound,
        }
    }

    async fn await_close_acks(&mut self) -> StreamResult<()> {
        for reader in &mut self.readers {
            match timeout(self.timeout, reader.next_frame()).await {
                Err(_) => return Err(timeout_error(&self.channel, self.timeout)),
                Ok(Ok(Some(Frame::CloseAck))) => {}
                Ok(Ok(Some(other))) => {
                    return Err(StreamError::Protocol(format!(
                        "expected CLOSE_ACK on '{}', got frame {:#04x}",
                        self.channel,
                        other.frame_type()
                    )))
                }
                Ok(Ok(None)) => return Err(StreamError::Disconnected(self.channel.clone())),
                Ok(Err(e)) => return Err(e),
            }
        }
        Ok(())
    }
}

async fn pump(
    channel: String,
    mut queue: mpsc::Receiver<Vec<u8>>,
    mut writers: Vec<OwnedWriteHalf>,
) -> StreamResult<Vec<OwnedWriteHalf>> {
    while let Some(bytes) = queue.recv().await {
        for writer in writers.iter_mut() {
            writer.write_all(&bytes).await.map_err(|e| {
                debug!(channel = %channel, error = %e, "Background write failed");
                StreamError::Disconnected(channel.clone())
            })?;
        }
    }
    for writer in writers.iter_mut() {
        writer.flush().await?;
    }
    Ok(writers)
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, frame: Frame) -> StreamResult<()> {
        let bytes = frame.encode()?;

        match &mut self.outbound {
            Outbound::Inline(writers) => {
                for writer in writers.iter_mut() {
                    writer
                        .write_all(&bytes)
                        .await
                        .map_err(|_| StreamError::Disconnected(self.channel.clone()))?;
                }
                Ok(())
            }
            Outbound::Threaded { queue, .. } => queue
                .send(bytes)
                .await
                .map_err(|_| StreamError::Disconnected(self.channel.clone())),
            Outbound::Finished => Err(StreamError::Closed(self.channel.clone())),
        }
    }

    async fn finish(&mut self) -> StreamResult<()> {
        let mut writers = match std::mem::replace(&mut self.outbound, Outbound::Finished) {
            Outbound::Inline(writers) => writers,
            Outbound::Threaded { queue, pump } => {
                // Closing the queue lets the pump drain and hand the sockets back
                drop(queue);
                pump.await.map_err(|e| {
                    StreamError::Protocol(format!("writer task for '{}' failed: {}", self.channel, e))
                })??
            }
            Outbound::Finished => return Ok(()),
        };

        if self.mode == TransportMode::Reliable {
            self.await_close_acks().await?;
        }

        for writer in writers.iter_mut() {
            let _ = writer.shutdown().await;
        }
        self.readers.clear();
        Ok(())
    }
}
