//! Configuration for wands.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axis_protocol::ConnectionId;
use axis_stream::{ConnectionParams, TransportMode};

use crate::error::{WandsError, WandsResult};

/// Population service endpoint used when none is configured.
pub const DEFAULT_NOTIFY_URL: &str = "http://localhost:8080/data";

/// Connection identifier used when none is configured.
pub const DEFAULT_CONNECTION_ID: &str = "wands";

/// Wands configuration.
#[derive(Debug, Clone)]
pub struct WandsConfig {
    /// Streaming transport parameters
    pub params: ConnectionParams,

    /// Names the consumer/producer pairing
    pub connection_id: ConnectionId,

    /// Population service endpoint; `None` disables notifications
    pub notify_url: Option<String>,

    /// Directory holding the local cache
    pub cache_dir: PathBuf,
}

impl WandsConfig {
    /// Build a config from the process environment.
    ///
    /// Unset variables fall back to defaults; set but malformed ones are
    /// rejected.
    pub fn from_env() -> WandsResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> WandsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConnectionParams::default();

        let params = ConnectionParams {
            address: lookup("WANDS_ADDRESS").unwrap_or(defaults.address),
            port: parse_var(&lookup, "WANDS_PORT")?.unwrap_or(defaults.port),
            timeout: parse_var::<u64, _>(&lookup, "WANDS_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            transport_mode: parse_var::<TransportMode, _>(&lookup, "WANDS_TRANSPORT_MODE")?
                .unwrap_or(defaults.transport_mode),
            rendezvous_reader_count: parse_var(&lookup, "WANDS_RENDEZVOUS_READERS")?
                .unwrap_or(defaults.rendezvous_reader_count),
            threading: parse_var(&lookup, "WANDS_THREADING")?.unwrap_or(defaults.threading),
        };

        if params.rendezvous_reader_count == 0 {
            return Err(WandsError::Config(
                "WANDS_RENDEZVOUS_READERS must be at least 1".to_string(),
            ));
        }

        let connection_id = lookup("WANDS_CONNECTION_ID")
            .unwrap_or_else(|| DEFAULT_CONNECTION_ID.to_string())
            .into();

        let notify_url = match lookup("WANDS_NOTIFY_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some(DEFAULT_NOTIFY_URL.to_string()),
        };

        let cache_dir = match lookup("WANDS_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir()?,
        };

        Ok(Self {
            params,
            connection_id,
            notify_url,
            cache_dir,
        })
    }
}

/// `~/.wands/cache`
pub fn default_cache_dir() -> WandsResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".wands").join("cache"))
        .ok_or_else(|| WandsError::Config("Cannot determine home directory".to_string()))
}

fn parse_var<T, F>(lookup: &F, key: &str) -> WandsResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| WandsError::Config(format!("Invalid {}={:?}: {}", key, raw, e))),
    }
}
