//! Step framing shared by every transport.
//!
//! Transports only move [`Frame`]s. [`StepWriter`] and [`StepReader`] turn a
//! frame pipe into the channel API and enforce step discipline:
//!
//! - put/get/end_step only inside a step
//! - data must match its declaration
//! - a reader surfaces a step only once its END_STEP has arrived

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelReader, ChannelWriter, StepStatus};
use crate::error::{StreamError, StreamResult};
use crate::payload::{ArrayData, VariableInfo};
use crate::protocol::Frame;

/// Outbound frame pipe of a writer.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> StreamResult<()>;

    /// Called once after CLOSE was sent: flush and run any close handshake.
    async fn finish(&mut self) -> StreamResult<()>;
}

/// Inbound frame pipe of a reader.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` if the pipe ended without a CLOSE.
    ///
    /// Must be cancel-safe: a timed-out call may not lose frames.
    async fn recv(&mut self) -> StreamResult<Option<Frame>>;

    /// Called once when CLOSE arrives.
    async fn acknowledge_close(&mut self) -> StreamResult<()>;

    async fn shutdown(&mut self);
}

/// Writer state machine over any [`FrameSink`].
pub struct StepWriter<S> {
    channel: String,
    sink: S,
    declared: HashMap<String, VariableInfo>,
    pending: Vec<VariableInfo>,
    step: u64,
    in_step: bool,
    closed: bool,
}

impl<S: FrameSink> StepWriter<S> {
    pub fn new(channel: impl Into<String>, sink: S) -> Self {
        Self {
            channel: channel.into(),
            sink,
            declared: HashMap::new(),
            pending: Vec::new(),
            step: 0,
            in_step: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Closed(self.channel.clone()));
        }
        Ok(())
    }

    fn ensure_in_step(&self) -> StreamResult<()> {
        self.ensure_open()?;
        if !self.in_step {
            return Err(StreamError::NotInStep(self.channel.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: FrameSink> ChannelWriter for StepWriter<S> {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn declare(&mut self, variable: VariableInfo) -> StreamResult<()> {
        self.ensure_open()?;
        self.declared
            .insert(variable.name.clone(), variable.clone());

        if self.in_step {
            self.sink.send(Frame::Declare(variable)).await
        } else {
            self.pending.push(variable);
            Ok(())
        }
    }

    async fn begin_step(&mut self) -> StreamResult<()> {
        self.ensure_open()?;
        if self.in_step {
            return Err(StreamError::Protocol(format!(
                "step {} already open on '{}'",
                self.step, self.channel
            )));
        }

        self.sink.send(Frame::BeginStep { step: self.step }).await?;
        for variable in std::mem::take(&mut self.pending) {
            self.sink.send(Frame::Declare(variable)).await?;
        }
        self.in_step = true;

        trace!(channel = %self.channel, step = self.step, "Writer step begun");
        Ok(())
    }

    async fn put(&mut self, variable: &str, data: &ArrayData) -> StreamResult<()> {
        self.ensure_in_step()?;

        let info = self
            .declared
            .get(variable)
            .ok_or_else(|| StreamError::UnknownVariable(variable.to_string()))?;

        if info.dtype != data.dtype() || info.element_count() != data.len() {
            return Err(StreamError::BufferMismatch {
                variable: variable.to_string(),
                expected: format!("{} x {}", info.element_count(), info.dtype),
                actual: format!("{} x {}", data.len(), data.dtype()),
            });
        }

        self.sink
            .send(Frame::Put {
                variable: variable.to_string(),
                data: data.clone(),
            })
            .await
    }

    async fn end_step(&mut self) -> StreamResult<()> {
        self.ensure_in_step()?;
        self.sink.send(Frame::EndStep).await?;
        self.in_step = false;
        self.step += 1;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        if self.in_step {
            warn!(channel = %self.channel, step = self.step, "Closing writer with an open step");
            self.end_step().await?;
        }

        self.closed = true;
        self.sink.send(Frame::Close).await?;
        self.sink.finish().await?;

        debug!(channel = %self.channel, steps = self.step, "Writer closed");
        Ok(())
    }
}

/// Reader state machine over any [`FrameSource`].
pub struct StepReader<S> {
    channel: String,
    source: S,
    timeout: Duration,
    declared: HashMap<String, VariableInfo>,
    current: HashMap<String, ArrayData>,
    /// BEGIN_STEP seen, END_STEP not yet
    assembling: bool,
    in_step: bool,
    ended: bool,
    closed: bool,
}

impl<S: FrameSource> StepReader<S> {
    pub fn new(channel: impl Into<String>, source: S, timeout: Duration) -> Self {
        Self {
            channel: channel.into(),
            source,
            timeout,
            declared: HashMap::new(),
            current: HashMap::new(),
            assembling: false,
            in_step: false,
            ended: false,
            closed: false,
        }
    }

    /// Pull frames until a step completes or the stream ends.
    ///
    /// All progress lives in `self`, so a timeout between frames resumes
    /// where it left off on the next call.
    async fn read_step(&mut self) -> StreamResult<StepStatus> {
        loop {
            let frame = self
                .source
                .recv()
                .await?
                .ok_or_else(|| StreamError::Disconnected(self.channel.clone()))?;

            match frame {
                Frame::BeginStep { step } => {
                    if self.assembling {
                        return Err(self.protocol("BEGIN_STEP inside an open step"));
                    }
                    trace!(channel = %self.channel, step, "Reader step begun");
                    self.current.clear();
                    self.assembling = true;
                }
                Frame::Declare(info) => {
                    if !self.assembling {
                        return Err(self.protocol("DECLARE outside a step"));
                    }
                    self.declared.insert(info.name.clone(), info);
                }
                Frame::Put { variable, data } => {
                    if !self.assembling {
                        return Err(self.protocol("PUT outside a step"));
                    }
                    if let Some(info) = self.declared.get(&variable) {
                        if info.dtype != data.dtype() || info.element_count() != data.len() {
                            return Err(self.protocol(&format!(
                                "data for '{}' does not match its declaration",
                                variable
                            )));
                        }
                    }
                    self.current.insert(variable, data);
                }
                Frame::EndStep => {
                    if !self.assembling {
                        return Err(self.protocol("END_STEP without BEGIN_STEP"));
                    }
                    self.assembling = false;
                    self.in_step = true;
                    return Ok(StepStatus::Ok);
                }
                Frame::Close => {
                    if self.assembling {
                        return Err(self.protocol("stream closed inside a step"));
                    }
                    self.ended = true;
                    self.source.acknowledge_close().await?;
                    return Ok(StepStatus::EndOfStream);
                }
                other => {
                    return Err(self.protocol(&format!(
                        "unexpected frame {:#04x}",
                        other.frame_type()
                    )));
                }
            }
        }
    }

    fn protocol(&self, detail: &str) -> StreamError {
        StreamError::Protocol(format!("{} on '{}'", detail, self.channel))
    }
}

#[async_trait]
impl<S: FrameSource> ChannelReader for StepReader<S> {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn begin_step(&mut self) -> StreamResult<StepStatus> {
        if self.closed {
            return Err(StreamError::Closed(self.channel.clone()));
        }
        if self.ended {
            return Ok(StepStatus::EndOfStream);
        }
        if self.in_step {
            return Err(self.protocol("begin_step before end_step"));
        }

        match tokio::time::timeout(self.timeout, self.read_step()).await {
            Ok(status) => status,
            Err(_) => {
                debug!(channel = %self.channel, timeout = ?self.timeout, "No step within timeout");
                Ok(StepStatus::NotReady)
            }
        }
    }

    fn inquire_variable(&self, variable: &str) -> Option<VariableInfo> {
        self.declared.get(variable).cloned()
    }

    fn has_data(&self, variable: &str) -> bool {
        self.in_step && self.current.contains_key(variable)
    }

    fn get(&mut self, variable: &str, buffer: &mut ArrayData) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Closed(self.channel.clone()));
        }
        if !self.in_step {
            return Err(StreamError::NotInStep(self.channel.clone()));
        }
        let data = self
            .current
            .get(variable)
            .ok_or_else(|| StreamError::UnknownVariable(variable.to_string()))?;
        buffer.copy_from(variable, data)
    }

    fn end_step(&mut self) -> StreamResult<()> {
        if !self.in_step {
            return Err(StreamError::NotInStep(self.channel.clone()));
        }
        self.current.clear();
        self.in_step = false;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current.clear();
        self.source.shutdown().await;
        debug!(channel = %self.channel, "Reader closed");
        Ok(())
    }
}
