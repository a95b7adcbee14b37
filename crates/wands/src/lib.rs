//! Wands: on-demand access to remote datasets through a local cache.
//!
//! Consumers ask for named signals of a logical file. Whatever the local
//! cache holds is served from disk; the rest is fetched from a remote
//! producer over the axis protocol and written back to the cache.
//!
//! # Core Invariants
//!
//! 1. **Cache First**: names the cache holds are never requested remotely
//! 2. **Partition**: every distinct requested name is either local or remote
//! 3. **Write Back**: every remotely fetched payload is cached before return
//! 4. **Local Wins**: on a merge collision the cached copy is returned
//!
//! # Architecture
//!
//! ```text
//! CacheOrchestrator ─> CacheStore (check_availability, load, write)
//!        │
//!        ├──> PopulationNotifier (spawned, fire-and-forget)
//!        │
//!        └──> RemoteFetcher ─> AxisNegotiator ─> StreamTransport
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod notifier;
pub mod orchestrator;

#[cfg(test)]
mod tests;

pub use cache::{CacheStore, DirCacheStore, MemoryCacheStore};
pub use config::WandsConfig;
pub use error::{WandsError, WandsResult};
pub use notifier::{HttpNotifier, PopulationNotifier, PopulationRequest};
pub use orchestrator::CacheOrchestrator;
