//! Step-framed named streaming channels.
//!
//! A channel is a named, one-directional stream of *steps*. Each step is a
//! bounded transfer window: the writer begins it, declares variables (name,
//! element type, shape), puts data, and ends it. The reader blocks in
//! `begin_step` until a whole step is available or the stream ends, inquires
//! the declared metadata, allocates a buffer of the declared shape, and gets
//! the data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                         ┌──────────────────┐
//! │  ChannelWriter   │                         │  ChannelReader   │
//! │  (StepWriter)    │                         │  (StepReader)    │
//! └────────┬─────────┘                         └────────▲─────────┘
//!          │ Frame                                      │ Frame
//!          ▼                                            │
//! ┌─────────────────────────────────────────────────────┴──────────┐
//! │ StreamTransport: MemoryTransport (in-process hub)              │
//! │                  TcpTransport    (rendezvous over TCP)         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Protocol code depends only on [`StreamTransport`], so transports are
//! interchangeable.
//!
//! # Usage
//!
//! ```ignore
//! use axis_stream::{ArrayData, DataType, StepStatus, StreamTransport, VariableInfo};
//!
//! let mut writer = transport.open_writer("run-42").await?;
//! writer.declare(VariableInfo::new("temperature", DataType::F64, vec![3])).await?;
//! writer.begin_step().await?;
//! writer.put("temperature", &ArrayData::F64(vec![1.0, 2.0, 3.0])).await?;
//! writer.end_step().await?;
//! writer.close().await?;
//!
//! let mut reader = transport.open_reader("run-42").await?;
//! while reader.begin_step().await? == StepStatus::Ok {
//!     if let Some(info) = reader.inquire_variable("temperature") {
//!         let mut buffer = info.allocate();
//!         reader.get("temperature", &mut buffer)?;
//!     }
//!     reader.end_step()?;
//! }
//! reader.close().await?;
//! ```

pub mod channel;
pub mod error;
pub mod memory;
pub mod params;
pub mod payload;
pub mod protocol;
pub mod step;
pub mod tcp;

// Re-export common types
pub use channel::{ChannelReader, ChannelWriter, StepStatus, StreamTransport};
pub use error::{StreamError, StreamResult};
pub use memory::MemoryTransport;
pub use params::{ConnectionParams, TransportMode};
pub use payload::{element_count, ArrayData, DataType, Payload, VariableInfo};
pub use tcp::TcpTransport;
