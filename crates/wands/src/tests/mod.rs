//! Integration tests for the cache orchestrator.
//!
//! - `harness.rs`       - Recording cache, transport and notifier doubles,
//!                        plus a responder over the in-process transport
//! - `orchestration.rs` - Local/remote split, write-back and idempotence
//! - `failures.rs`      - Contract violations, transport and notifier failures

mod orchestration;
