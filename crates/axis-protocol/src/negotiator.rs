//! Consumer side of the axis protocol.
//!
//! One cycle per name:
//!
//! ```text
//! Idle -> RequestSent -> AwaitingAck -> Found -> Streaming -> Complete
//!                                    \-> NotFound -> Failed
//! ```
//!
//! Every channel is opened fresh for the cycle and fully closed before the
//! next one starts.

use std::fmt;
use std::sync::Arc;

use axis_stream::{
    ArrayData, ChannelReader, DataType, Payload, StepStatus, StreamError, StreamTransport,
    VariableInfo,
};
use tracing::{debug, info, trace, warn};

use crate::descriptor::{ChannelSet, ConnectionId, ACK_VARIABLE, REQUEST_VARIABLE};
use crate::error::{NegotiationError, NegotiationResult};
use crate::steps::{abandon, drain_to_end, not_ready};

/// Where a negotiation cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatorState {
    Idle,
    RequestSent,
    AwaitingAck,
    Found,
    NotFound,
    Streaming,
    Complete,
    Failed,
}

impl fmt::Display for NegotiatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiatorState::Idle => "idle",
            NegotiatorState::RequestSent => "request_sent",
            NegotiatorState::AwaitingAck => "awaiting_ack",
            NegotiatorState::Found => "found",
            NegotiatorState::NotFound => "not_found",
            NegotiatorState::Streaming => "streaming",
            NegotiatorState::Complete => "complete",
            NegotiatorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Requests single named datasets from a remote responder.
pub struct AxisNegotiator {
    transport: Arc<dyn StreamTransport>,
    channels: ChannelSet,
    state: NegotiatorState,
}

impl AxisNegotiator {
    pub fn new(transport: Arc<dyn StreamTransport>, connection: &ConnectionId) -> Self {
        Self {
            transport,
            channels: ChannelSet::for_connection(connection),
            state: NegotiatorState::Idle,
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// State reached by the most recent cycle.
    pub fn state(&self) -> NegotiatorState {
        self.state
    }

    /// Run one full cycle for `axis`.
    ///
    /// Returns [`NegotiationError::AxisNotFound`] when the producer does not
    /// have the name; any other error means the cycle itself failed.
    pub async fn request(&mut self, axis: &str) -> NegotiationResult<Payload> {
        self.state = NegotiatorState::Idle;

        let result = self.run_cycle(axis).await;
        match &result {
            Ok(payload) => {
                self.transition(axis, NegotiatorState::Complete);
                info!(axis = %axis, shape = ?payload.shape, "Axis received");
            }
            Err(NegotiationError::AxisNotFound(_)) => {
                self.transition(axis, NegotiatorState::Failed);
                info!(axis = %axis, "Axis not found upstream");
            }
            Err(e) => {
                self.transition(axis, NegotiatorState::Failed);
                warn!(axis = %axis, error = %e, "Negotiation failed");
            }
        }
        result
    }

    async fn run_cycle(&mut self, axis: &str) -> NegotiationResult<Payload> {
        self.send_request(axis).await?;
        self.transition(axis, NegotiatorState::RequestSent);

        self.transition(axis, NegotiatorState::AwaitingAck);
        if !self.receive_ack().await? {
            self.transition(axis, NegotiatorState::NotFound);
            return Err(NegotiationError::AxisNotFound(axis.to_string()));
        }
        self.transition(axis, NegotiatorState::Found);

        self.transition(axis, NegotiatorState::Streaming);
        self.receive_payload(axis).await
    }

    async fn send_request(&self, axis: &str) -> NegotiationResult<()> {
        let bytes = axis.as_bytes().to_vec();
        let mut writer = self.transport.open_writer(&self.channels.request).await?;

        writer
            .declare(VariableInfo::new(
                REQUEST_VARIABLE,
                DataType::U8,
                vec![bytes.len()],
            ))
            .await?;
        writer.begin_step().await?;
        writer.put(REQUEST_VARIABLE, &ArrayData::U8(bytes)).await?;
        writer.end_step().await?;
        writer.close().await?;
        Ok(())
    }

    async fn receive_ack(&self) -> NegotiationResult<bool> {
        let mut reader = self.transport.open_reader(&self.channels.ack).await?;

        match read_flag(reader.as_mut()).await {
            Ok(found) => {
                reader.close().await?;
                Ok(found)
            }
            Err(e) => {
                abandon(reader.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn receive_payload(&self, axis: &str) -> NegotiationResult<Payload> {
        let mut reader = self.transport.open_reader(&self.channels.data).await?;

        match read_payload(reader.as_mut(), axis).await {
            Ok(payload) => {
                reader.close().await?;
                Ok(payload)
            }
            Err(e) => {
                abandon(reader.as_mut()).await;
                Err(e)
            }
        }
    }

    fn transition(&mut self, axis: &str, next: NegotiatorState) {
        trace!(axis = %axis, from = %self.state, to = %next, "Negotiator state");
        self.state = next;
    }
}

async fn read_flag(reader: &mut dyn ChannelReader) -> NegotiationResult<bool> {
    let channel = reader.channel().to_string();

    match reader.begin_step().await? {
        StepStatus::Ok => {}
        StepStatus::EndOfStream => {
            return Err(StreamError::Protocol(format!(
                "acknowledgment channel '{}' ended without a flag",
                channel
            ))
            .into())
        }
        StepStatus::NotReady => return Err(not_ready(&channel).into()),
    }

    let info = reader
        .inquire_variable(ACK_VARIABLE)
        .filter(|_| reader.has_data(ACK_VARIABLE))
        .ok_or_else(|| StreamError::UnknownVariable(ACK_VARIABLE.to_string()))?;

    let mut buffer = info.allocate();
    reader.get(ACK_VARIABLE, &mut buffer)?;
    reader.end_step()?;

    let found = match buffer {
        ArrayData::U8(values) if !values.is_empty() => values[0] != 0,
        other => {
            return Err(StreamError::Protocol(format!(
                "acknowledgment flag must be one u8, got {} x {}",
                other.len(),
                other.dtype()
            ))
            .into())
        }
    };

    drain_to_end(reader).await?;
    Ok(found)
}

async fn read_payload(reader: &mut dyn ChannelReader, axis: &str) -> NegotiationResult<Payload> {
    let mut payload: Option<Payload> = None;

    loop {
        match reader.begin_step().await? {
            StepStatus::Ok => {
                if reader.has_data(axis) {
                    if payload.is_some() {
                        warn!(axis = %axis, "Ignoring repeated data step");
                    } else if let Some(info) = reader.inquire_variable(axis) {
                        let mut buffer = info.allocate();
                        reader.get(axis, &mut buffer)?;
                        payload = Some(Payload::new(info.shape, buffer)?);
                    }
                } else {
                    debug!(axis = %axis, "Step without data for axis");
                }
                reader.end_step()?;
            }
            StepStatus::EndOfStream => break,
            StepStatus::NotReady => return Err(not_ready(reader.channel()).into()),
        }
    }

    payload.ok_or_else(|| NegotiationError::MissingPayload(axis.to_string()))
}
