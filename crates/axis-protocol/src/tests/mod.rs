//! Integration tests for axis negotiation.
//!
//! - `harness.rs`     - Responder harness over the in-process transport
//! - `negotiation.rs` - Single-name cycles: found, not found, ordering
//! - `fetch.rs`       - Batch fetches and failure handling
//! - `tcp.rs`         - Full cycles over the TCP transport

pub(crate) mod harness;
