//! Named, directional, step-framed channels.
//!
//! A transport opens a channel by name in one direction. Writers declare
//! variables and put data inside steps; readers wait for a step, inquire the
//! declared metadata, allocate a buffer, and get the data.

use async_trait::async_trait;

use crate::error::StreamResult;
use crate::payload::{ArrayData, VariableInfo};

/// Outcome of [`ChannelReader::begin_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// A complete step is available
    Ok,
    /// The writer closed the stream; no more steps will arrive
    EndOfStream,
    /// Nothing arrived within the transport timeout
    NotReady,
}

/// Source of channels. Implementations are pluggable; protocol code only
/// sees this trait.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open `channel` for writing.
    async fn open_writer(&self, channel: &str) -> StreamResult<Box<dyn ChannelWriter>>;

    /// Open `channel` for reading.
    async fn open_reader(&self, channel: &str) -> StreamResult<Box<dyn ChannelReader>>;
}

/// Write side of a channel.
#[async_trait]
pub trait ChannelWriter: Send {
    fn channel(&self) -> &str;

    /// Declare a variable. Declarations travel with the next step, ahead of
    /// its data, or immediately when a step is already open.
    async fn declare(&mut self, variable: VariableInfo) -> StreamResult<()>;

    async fn begin_step(&mut self) -> StreamResult<()>;

    /// Put data for a declared variable within the current step.
    async fn put(&mut self, variable: &str, data: &ArrayData) -> StreamResult<()>;

    async fn end_step(&mut self) -> StreamResult<()>;

    /// Mark end of stream and release the channel.
    async fn close(&mut self) -> StreamResult<()>;
}

/// Read side of a channel.
#[async_trait]
pub trait ChannelReader: Send {
    fn channel(&self) -> &str;

    /// Block until the next step is complete, the stream ends, or the
    /// transport timeout elapses.
    async fn begin_step(&mut self) -> StreamResult<StepStatus>;

    /// Declared metadata of `variable`, once any step has carried its
    /// declaration.
    fn inquire_variable(&self, variable: &str) -> Option<VariableInfo>;

    /// Whether the current step carries data for `variable`.
    fn has_data(&self, variable: &str) -> bool;

    /// Copy the current step's data for `variable` into `buffer`.
    fn get(&mut self, variable: &str, buffer: &mut ArrayData) -> StreamResult<()>;

    fn end_step(&mut self) -> StreamResult<()>;

    async fn close(&mut self) -> StreamResult<()>;
}
