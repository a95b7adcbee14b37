//! Connection parameters for networked transports.
//!
//! Protocol code treats these as opaque and hands them to the transport
//! untouched. Only [`crate::tcp::TcpTransport`] interprets them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Delivery guarantee at stream close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Writer close waits until every reader acknowledged end of stream.
    #[default]
    Reliable,
    /// Writer close returns as soon as the close marker is written.
    Fast,
}

impl FromStr for TransportMode {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reliable" => Ok(TransportMode::Reliable),
            "fast" => Ok(TransportMode::Fast),
            other => Err(StreamError::Protocol(format!(
                "Unknown transport mode '{}', expected 'reliable' or 'fast'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Reliable => f.write_str("reliable"),
            TransportMode::Fast => f.write_str("fast"),
        }
    }
}

/// Address, port, timeout, reliability mode, reader count, threading flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Host the writer side binds and the reader side connects to
    pub address: String,

    /// Port shared by all channels of a pairing (channels are sequential)
    pub port: u16,

    /// Bound on rendezvous, step waits and close handshakes
    pub timeout: Duration,

    pub transport_mode: TransportMode,

    /// Readers a writer waits for before its first step
    pub rendezvous_reader_count: usize,

    /// Hand writer output to a background task instead of writing inline
    pub threading: bool,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 12345,
            timeout: Duration::from_secs(30),
            transport_mode: TransportMode::Reliable,
            rendezvous_reader_count: 1,
            threading: true,
        }
    }
}

impl ConnectionParams {
    /// `address:port` as accepted by tokio's address resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
