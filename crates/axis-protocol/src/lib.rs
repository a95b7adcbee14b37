//! Axis: request/acknowledge/stream negotiation for named remote datasets.
//!
//! A consumer asks a producer, by hierarchical path, whether a dataset
//! exists and, if so, receives its current value. Each pairing is named by a
//! [`ConnectionId`] and talks over three channels derived from it.
//!
//! # Core Invariants
//!
//! 1. **Ack First**: the consumer never opens the data channel before a
//!    positive acknowledgment
//! 2. **Atomic Lookup**: the producer resolves a name once per cycle and
//!    acks and streams that same result
//! 3. **Fresh Channels**: all three channels are opened and closed within
//!    one cycle and never reused
//! 4. **One At A Time**: a responder serves one request per cycle
//!
//! # Architecture
//!
//! ```text
//! RemoteFetcher ─> AxisNegotiator                 AxisResponder ─> SourceStore
//!                        │  "axis"+id       (name)       ▲
//!                        ├────────────────────────────────┤
//!                        │  "axis_check"+id (flag)        │
//!                        ◄────────────────────────────────┤
//!                        │  id              (payload)     │
//!                        ◄────────────────────────────────┘
//! ```

pub mod descriptor;
pub mod error;
pub mod fetcher;
pub mod negotiator;
pub mod responder;
pub mod source;
mod steps;

#[cfg(test)]
mod tests;

pub use descriptor::{ChannelSet, ConnectionId, ACK_VARIABLE, REQUEST_VARIABLE};
pub use error::{NegotiationError, NegotiationResult};
pub use fetcher::{PayloadMap, RemoteFetcher};
pub use negotiator::{AxisNegotiator, NegotiatorState};
pub use responder::{AxisResponder, CycleOutcome};
pub use source::{JsonSourceStore, MemorySourceStore, SourceStore};
