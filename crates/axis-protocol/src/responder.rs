//! Producer side of the axis protocol.
//!
//! One request at a time:
//!
//! ```text
//! AwaitingRequest -> LookupOk   -> Acking(true)  -> Sending -> Complete
//!                 \-> LookupFail -> Acking(false) ----------> Complete
//! ```
//!
//! The lookup result is captured once and drives both the acknowledgment and
//! the data stream, so a store that changes mid-cycle can never ack one
//! thing and send another.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axis_stream::{
    ArrayData, ChannelReader, DataType, Payload, StepStatus, StreamError, StreamTransport,
    VariableInfo,
};
use tracing::{debug, error, info, trace, warn};

use crate::descriptor::{ChannelSet, ConnectionId, ACK_VARIABLE, REQUEST_VARIABLE};
use crate::error::NegotiationResult;
use crate::source::SourceStore;
use crate::steps::{abandon, drain_to_end};

/// Pause after a failed cycle before waiting for the next request.
const ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Result of one [`AxisResponder::serve_one`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No request arrived
    Idle,
    /// Acknowledged and streamed
    Served { axis: String, shape: Vec<usize> },
    /// Acknowledged as not found
    NotFound { axis: String },
}

/// Answers axis requests from a [`SourceStore`].
pub struct AxisResponder {
    transport: Arc<dyn StreamTransport>,
    channels: ChannelSet,
    source: Arc<dyn SourceStore>,
}

impl AxisResponder {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        connection: &ConnectionId,
        source: Arc<dyn SourceStore>,
    ) -> Self {
        Self {
            transport,
            channels: ChannelSet::for_connection(connection),
            source,
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Serve requests until the process ends.
    ///
    /// A failed cycle is logged and the loop continues after a short pause.
    pub async fn serve(&self) -> NegotiationResult<()> {
        info!(channel = %self.channels.request, "Responder waiting for requests");

        loop {
            if let Err(e) = self.serve_one().await {
                error!(error = %e, "Error serving request");
                tokio::time::sleep(ERROR_PAUSE).await;
            }
        }
    }

    /// Serve requests until `shutdown` resolves.
    pub async fn serve_until<F>(&self, shutdown: F) -> NegotiationResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown => {
                info!("Responder shutting down");
                Ok(())
            }
        }
    }

    /// Run a single request cycle.
    pub async fn serve_one(&self) -> NegotiationResult<CycleOutcome> {
        let Some(request) = self.receive_request().await? else {
            return Ok(CycleOutcome::Idle);
        };

        let axis = match String::from_utf8(request) {
            Ok(axis) => axis,
            Err(e) => {
                let axis = String::from_utf8_lossy(e.as_bytes()).into_owned();
                warn!(axis = %axis, "Request name is not valid UTF-8");
                self.send_ack(false).await?;
                return Ok(CycleOutcome::NotFound { axis });
            }
        };

        let resolved = match self.source.lookup(&axis).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(axis = %axis, error = %e, "Lookup failed, answering not found");
                None
            }
        };

        match resolved {
            Some(payload) => {
                trace!(axis = %axis, "Lookup ok");
                self.send_ack(true).await?;
                self.send_payload(&axis, &payload).await?;
                info!(axis = %axis, shape = ?payload.shape, "Served axis");
                Ok(CycleOutcome::Served {
                    axis,
                    shape: payload.shape,
                })
            }
            None => {
                trace!(axis = %axis, "Lookup failed");
                self.send_ack(false).await?;
                info!(axis = %axis, "Axis not found");
                Ok(CycleOutcome::NotFound { axis })
            }
        }
    }

    /// The raw request bytes, or `None` when no request arrived.
    async fn receive_request(&self) -> NegotiationResult<Option<Vec<u8>>> {
        let mut reader = match self.transport.open_reader(&self.channels.request).await {
            Ok(reader) => reader,
            Err(StreamError::Timeout { .. } | StreamError::ChannelRejected(_)) => {
                debug!(channel = %self.channels.request, "No consumer connected");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match read_request(reader.as_mut()).await {
            Ok(request) => {
                reader.close().await?;
                Ok(request)
            }
            Err(e) => {
                abandon(reader.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn send_ack(&self, found: bool) -> NegotiationResult<()> {
        let mut writer = self.transport.open_writer(&self.channels.ack).await?;

        writer
            .declare(VariableInfo::new(ACK_VARIABLE, DataType::U8, vec![1]))
            .await?;
        writer.begin_step().await?;
        writer
            .put(ACK_VARIABLE, &ArrayData::U8(vec![u8::from(found)]))
            .await?;
        writer.end_step().await?;
        writer.close().await?;
        Ok(())
    }

    async fn send_payload(&self, axis: &str, payload: &Payload) -> NegotiationResult<()> {
        let mut writer = self.transport.open_writer(&self.channels.data).await?;

        writer.declare(payload.variable(axis)).await?;
        writer.begin_step().await?;
        writer.put(axis, &payload.data).await?;
        writer.end_step().await?;
        writer.close().await?;
        Ok(())
    }
}

async fn read_request(reader: &mut dyn ChannelReader) -> NegotiationResult<Option<Vec<u8>>> {
    match reader.begin_step().await? {
        StepStatus::Ok => {}
        StepStatus::EndOfStream => {
            debug!(channel = %reader.channel(), "Request stream ended without a request");
            return Ok(None);
        }
        StepStatus::NotReady => {
            debug!(channel = %reader.channel(), "No request within timeout");
            return Ok(None);
        }
    }

    let info = reader
        .inquire_variable(REQUEST_VARIABLE)
        .filter(|_| reader.has_data(REQUEST_VARIABLE))
        .ok_or_else(|| StreamError::UnknownVariable(REQUEST_VARIABLE.to_string()))?;

    let mut buffer = info.allocate();
    reader.get(REQUEST_VARIABLE, &mut buffer)?;
    reader.end_step()?;

    let ArrayData::U8(bytes) = buffer else {
        return Err(StreamError::Protocol(format!(
            "request name must be u8 bytes, got {}",
            info.dtype
        ))
        .into());
    };

    drain_to_end(reader).await?;
    Ok(Some(bytes))
}
