//! # Observability
//!
//! Logging setup shared by the wands binaries.
//!
//! Binaries call [`init`] or [`init_with_config`] once at startup and then use
//! plain `tracing` macros. Every event is appended as one JSON line to
//! `~/.wands/logs/<service>.jsonl`, so
//!
//! ```text
//! tail -f ~/.wands/logs/wands.jsonl | jq
//! ```
//!
//! follows a running responder. Lines are flushed one at a time, which keeps
//! several processes appending to the same file readable.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "wands".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```
//!
//! `RUST_LOG` overrides `default_level` when set.

mod json_layer;
mod writer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{default_log_path, LogFileWriter};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written into every line as `service`, and names the default log file.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset (e.g. "info", "wands=debug").
    pub default_level: String,

    /// Log file; defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also print a compact human-readable stream to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "wands".to_string(),
            default_level: "info".to_string(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with defaults for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.to_string(),
        ..Default::default()
    });
}

/// Initialize logging.
///
/// If the log file cannot be opened, logging continues on stderr only and the
/// failure is reported there. Calling this twice leaves the first subscriber
/// in place.
pub fn init_with_config(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let log_path = config
        .log_path
        .clone()
        .or_else(|| default_log_path(&config.service_name));

    let (file_layer, open_error) = match log_path.as_deref().map(LogFileWriter::open) {
        Some(Ok(file)) => (Some(JsonLayer::new(config.service_name.clone(), file)), None),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, Some("cannot determine home directory".to_string())),
    };

    // Without a log file, stderr is the only place events can go
    let stderr_layer = (config.also_stderr || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }

    match (open_error, log_path) {
        (Some(reason), Some(path)) => tracing::warn!(
            path = %path.display(),
            reason = %reason,
            "Log file unavailable, logging to stderr only"
        ),
        (Some(reason), None) => {
            tracing::warn!(reason = %reason, "Log file unavailable, logging to stderr only")
        }
        (None, Some(path)) => tracing::debug!(path = %path.display(), "Logging initialized"),
        (None, None) => {}
    }
}
