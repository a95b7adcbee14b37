//! Batch retrieval of named datasets over the axis protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use axis_stream::{Payload, StreamTransport};
use tracing::{debug, info};

use crate::descriptor::ConnectionId;
use crate::error::{NegotiationError, NegotiationResult};
use crate::negotiator::AxisNegotiator;

/// Name-to-payload map returned by fetches and cache loads.
pub type PayloadMap = BTreeMap<String, Payload>;

/// Fetches batches of names, one negotiation cycle per name.
#[derive(Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn StreamTransport>,
}

impl RemoteFetcher {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self { transport }
    }

    /// Fetch every name the producer has.
    ///
    /// Names the producer does not have are left out of the map. Any other
    /// failure aborts the whole batch without a partial result.
    pub async fn fetch(
        &self,
        connection: &ConnectionId,
        names: &[String],
    ) -> NegotiationResult<PayloadMap> {
        let mut negotiator = AxisNegotiator::new(self.transport.clone(), connection);
        let mut fetched = PayloadMap::new();

        for name in names {
            match negotiator.request(name).await {
                Ok(payload) => {
                    fetched.insert(name.clone(), payload);
                }
                Err(NegotiationError::AxisNotFound(_)) => {
                    debug!(axis = %name, "Omitting missing axis");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            connection = %connection,
            requested = names.len(),
            fetched = fetched.len(),
            "Remote fetch complete"
        );
        Ok(fetched)
    }
}
