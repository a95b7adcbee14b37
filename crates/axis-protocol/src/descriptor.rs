//! Connection identifiers and the channel names derived from them.
//!
//! Both sides of a pairing compute channel names through
//! [`ChannelSet::for_connection`]; the concatenation is load-bearing.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variable carrying the requested axis name on the request channel.
pub const REQUEST_VARIABLE: &str = "axis";

/// Variable carrying the found/not-found flag on the acknowledgment channel.
pub const ACK_VARIABLE: &str = "axis_check";

/// Opaque name of one consumer/producer pairing.
///
/// Must be unique among pairings in flight at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh identifier: `prefix` followed by a random v4 UUID.
    pub fn unique(prefix: &str) -> Self {
        Self(format!("{}{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The three channels of one pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    /// Consumer to producer: the requested name
    pub request: String,
    /// Producer to consumer: the acknowledgment flag
    pub ack: String,
    /// Producer to consumer: the payload, only when found
    pub data: String,
}

impl ChannelSet {
    pub fn for_connection(id: &ConnectionId) -> Self {
        Self {
            request: format!("{}{}", REQUEST_VARIABLE, id),
            ack: format!("{}{}", ACK_VARIABLE, id),
            data: id.to_string(),
        }
    }
}
