//! Cache-first request orchestration.
//!
//! The local cache is the fast path; the axis protocol is the fallback.
//! One call handles a batch of names belonging to one logical file:
//!
//! 1. Split the distinct names into local and remote lists
//! 2. Load the local list from the cache
//! 3. Notify the population service and fetch the remote list
//! 4. Write the fetched payloads back to the cache
//! 5. Merge, with cached entries winning on collision

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axis_protocol::{ConnectionId, PayloadMap, RemoteFetcher};
use axis_stream::{StreamTransport, TcpTransport};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, DirCacheStore};
use crate::config::WandsConfig;
use crate::error::{WandsError, WandsResult};
use crate::notifier::{HttpNotifier, PopulationNotifier, PopulationRequest};

/// Serves named datasets from a local cache, fetching what is missing.
pub struct CacheOrchestrator {
    cache: Arc<dyn CacheStore>,
    fetcher: RemoteFetcher,
    connection: ConnectionId,
    notifier: Option<Arc<dyn PopulationNotifier>>,
    notifications: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheOrchestrator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        fetcher: RemoteFetcher,
        connection: ConnectionId,
    ) -> Self {
        Self {
            cache,
            fetcher,
            connection,
            notifier: None,
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PopulationNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Directory cache, TCP transport and HTTP notifier, as configured.
    pub async fn from_config(config: &WandsConfig) -> WandsResult<Self> {
        let cache = DirCacheStore::open(config.cache_dir.clone()).await?;
        let transport: Arc<dyn StreamTransport> =
            Arc::new(TcpTransport::new(config.params.clone()));

        let orchestrator = Self::new(
            Arc::new(cache),
            RemoteFetcher::new(transport),
            config.connection_id.clone(),
        );

        Ok(match &config.notify_url {
            Some(url) => orchestrator.with_notifier(Arc::new(HttpNotifier::new(url.clone()))),
            None => orchestrator,
        })
    }

    /// Where the cache lives.
    pub fn cache_location(&self) -> String {
        self.cache.location()
    }

    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    /// Resolve `names` for `filename`.
    ///
    /// Names found neither locally nor remotely are absent from the result.
    /// A remote transport failure fails the whole call.
    pub async fn request(&self, filename: &str, names: &[String]) -> WandsResult<PayloadMap> {
        let names = dedupe(names);

        let (remote_list, local_list) = self.cache.check_availability(filename, &names).await?;
        check_partition(&names, &remote_list, &local_list)?;

        let local_data = self.cache.load(filename, &local_list).await?;
        info!(filename = %filename, signals = ?local_list, "Signals found locally");
        info!(filename = %filename, signals = ?remote_list, "Signals to be requested remotely");

        let mut remote_data = PayloadMap::new();
        if !remote_list.is_empty() {
            self.notify(filename, &remote_list);

            remote_data = self.fetcher.fetch(&self.connection, &remote_list).await?;
            if remote_data.len() < remote_list.len() {
                debug!(
                    filename = %filename,
                    missing = remote_list.len() - remote_data.len(),
                    "Some signals are not available upstream"
                );
            }

            if !remote_data.is_empty() {
                self.cache.write(filename, &remote_data).await?;
            }
        }

        Ok(merge(filename, remote_data, local_data))
    }

    fn notify(&self, filename: &str, remote_list: &[String]) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let request = PopulationRequest {
            uri: filename.to_string(),
            signals: remote_list.to_vec(),
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = notifier.notify(&request).await {
                warn!(uri = %request.uri, error = %e, "Population notification failed");
            }
        });

        let mut notifications = self.notifications.lock();
        notifications.retain(|pending| !pending.is_finished());
        notifications.push(handle);
    }

    /// Wait up to `limit` for notifications still in flight.
    ///
    /// Notifications run detached from [`request`](Self::request), so a
    /// process that exits right after a request calls this first or the
    /// runtime may cancel them. Returns how many were still pending at the
    /// deadline.
    pub async fn flush_notifications(&self, limit: Duration) -> usize {
        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.notifications.lock());
        let deadline = Instant::now() + limit;
        let mut unfinished = 0;

        for handle in pending {
            if timeout_at(deadline, handle).await.is_err() {
                unfinished += 1;
            }
        }

        if unfinished > 0 {
            warn!(unfinished, "Population notifications still pending at exit");
        }
        unfinished
    }
}

/// Drop repeated names, keeping first occurrences in order.
fn dedupe(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

fn check_partition(names: &[String], remote: &[String], local: &[String]) -> WandsResult<()> {
    let requested: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut covered = HashSet::new();

    for name in remote.iter().chain(local) {
        if !requested.contains(name.as_str()) {
            return Err(WandsError::CacheContract(format!(
                "'{}' was not requested",
                name
            )));
        }
        if !covered.insert(name.as_str()) {
            return Err(WandsError::CacheContract(format!(
                "'{}' is listed more than once",
                name
            )));
        }
    }

    if covered.len() != requested.len() {
        return Err(WandsError::CacheContract(format!(
            "{} of {} requested names were not classified",
            requested.len() - covered.len(),
            requested.len()
        )));
    }
    Ok(())
}

fn merge(filename: &str, remote: PayloadMap, local: PayloadMap) -> PayloadMap {
    let mut merged = remote;
    for (name, payload) in local {
        if merged.insert(name.clone(), payload).is_some() {
            warn!(
                filename = %filename,
                signal = %name,
                "Signal both cached and fetched, keeping cached copy"
            );
        }
    }
    merged
}
