//! Local/remote split, write-back and idempotence.

use std::sync::Arc;
use std::time::Duration;

use axis_protocol::{MemorySourceStore, RemoteFetcher};
use axis_stream::MemoryTransport;

use super::harness::{names, signal, CacheCall, RecordingNotifier, TestHarness};
use crate::cache::DirCacheStore;
use crate::notifier::PopulationRequest;
use crate::orchestrator::CacheOrchestrator;

fn upstream() -> MemorySourceStore {
    MemorySourceStore::new()
        .with("/diag/a", signal(&[1.0, 2.0]))
        .with("/diag/b", signal(&[3.0]))
        .with("/diag/c", signal(&[4.0, 5.0, 6.0]))
}

#[tokio::test]
async fn test_cold_cache_fetches_everything_and_writes_back() {
    let harness = TestHarness::new(upstream());

    let data = harness
        .orchestrator
        .request("shot-1.h5", &names(&["/diag/a", "/diag/b"]))
        .await
        .unwrap();

    assert_eq!(data.len(), 2);
    assert_eq!(data["/diag/a"], signal(&[1.0, 2.0]));
    assert_eq!(harness.transport.requests(), 2);
    assert_eq!(
        harness.cache.writes(),
        vec![CacheCall::Write(
            "shot-1.h5".to_string(),
            names(&["/diag/a", "/diag/b"])
        )]
    );
    assert_eq!(
        harness.cache.loads(),
        vec![CacheCall::Load("shot-1.h5".to_string(), vec![])]
    );
}

#[tokio::test]
async fn test_second_request_is_served_locally() {
    let harness = TestHarness::new(upstream());
    let wanted = names(&["/diag/a", "/diag/c"]);

    let first = harness.orchestrator.request("shot-1.h5", &wanted).await.unwrap();
    let second = harness.orchestrator.request("shot-1.h5", &wanted).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.transport.requests(), 2);
    assert_eq!(harness.cache.writes().len(), 1);
    assert_eq!(
        harness.cache.loads().last(),
        Some(&CacheCall::Load("shot-1.h5".to_string(), wanted))
    );
}

#[tokio::test]
async fn test_only_missing_names_go_remote() {
    let harness = TestHarness::new(upstream());
    harness.cache.seed("shot-1.h5", "/diag/a", signal(&[9.0, 9.0])).await;

    let data = harness
        .orchestrator
        .request("shot-1.h5", &names(&["/diag/a", "/diag/b"]))
        .await
        .unwrap();

    // The cached copy is returned even though upstream differs
    assert_eq!(data["/diag/a"], signal(&[9.0, 9.0]));
    assert_eq!(data["/diag/b"], signal(&[3.0]));
    assert_eq!(harness.transport.requests(), 1);
    assert_eq!(
        harness.cache.calls()[..2],
        [
            CacheCall::CheckAvailability(
                "shot-1.h5".to_string(),
                names(&["/diag/a", "/diag/b"])
            ),
            CacheCall::Load("shot-1.h5".to_string(), names(&["/diag/a"])),
        ]
    );
}

#[tokio::test]
async fn test_names_missing_upstream_are_omitted_and_retried() {
    let harness = TestHarness::new(upstream());
    let wanted = names(&["/diag/a", "/diag/zz"]);

    let first = harness.orchestrator.request("f", &wanted).await.unwrap();
    assert_eq!(first.keys().collect::<Vec<_>>(), vec!["/diag/a"]);
    assert_eq!(harness.cache.cached_names("f"), names(&["/diag/a"]));

    let second = harness.orchestrator.request("f", &wanted).await.unwrap();
    assert_eq!(first, second);
    // The absent name is asked for again, the cached one is not
    assert_eq!(harness.transport.requests(), 3);
}

#[tokio::test]
async fn test_duplicate_names_collapse() {
    let harness = TestHarness::new(upstream());

    let data = harness
        .orchestrator
        .request("f", &names(&["/diag/b", "/diag/a", "/diag/b"]))
        .await
        .unwrap();

    assert_eq!(data.len(), 2);
    assert_eq!(harness.transport.requests(), 2);
    assert_eq!(
        harness.cache.calls()[0],
        CacheCall::CheckAvailability("f".to_string(), names(&["/diag/b", "/diag/a"]))
    );
}

#[tokio::test]
async fn test_filenames_are_cached_separately() {
    let harness = TestHarness::new(upstream());

    harness
        .orchestrator
        .request("one.h5", &names(&["/diag/a"]))
        .await
        .unwrap();
    harness
        .orchestrator
        .request("two.h5", &names(&["/diag/a"]))
        .await
        .unwrap();

    assert_eq!(harness.transport.requests(), 2);
}

#[tokio::test]
async fn test_empty_request_touches_nothing_remote() {
    let harness = TestHarness::new(upstream());

    let data = harness.orchestrator.request("f", &[]).await.unwrap();

    assert!(data.is_empty());
    assert_eq!(harness.transport.requests(), 0);
    assert!(harness.cache.writes().is_empty());
}

#[tokio::test]
async fn test_population_service_is_told_about_remote_names() {
    let (notifier, mut notifications) = RecordingNotifier::new(false);
    let harness = TestHarness::with_notifier(upstream(), notifier);
    harness.cache.seed("shot-7.h5", "/diag/a", signal(&[0.0])).await;

    harness
        .orchestrator
        .request("shot-7.h5", &names(&["/diag/a", "/diag/b", "/diag/c"]))
        .await
        .unwrap();

    let request = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        request,
        PopulationRequest {
            uri: "shot-7.h5".to_string(),
            signals: names(&["/diag/b", "/diag/c"]),
        }
    );
}

#[tokio::test]
async fn test_fully_local_request_sends_no_notification() {
    let (notifier, mut notifications) = RecordingNotifier::new(false);
    let harness = TestHarness::with_notifier(upstream(), notifier);
    harness.cache.seed("f", "/diag/a", signal(&[0.0])).await;

    harness
        .orchestrator
        .request("f", &names(&["/diag/a"]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_cache_location_comes_from_store() {
    let harness = TestHarness::new(MemorySourceStore::new());
    assert_eq!(harness.orchestrator.cache_location(), "recording");
}

#[tokio::test]
async fn test_directory_cache_serves_later_sessions_without_producer() {
    let dir = tempfile::TempDir::new().unwrap();
    let wanted = names(&["/diag/a", "/diag/b"]);

    let harness = TestHarness::new(upstream());
    let cache = Arc::new(DirCacheStore::open(dir.path()).await.unwrap());
    let online = CacheOrchestrator::new(
        cache,
        RemoteFetcher::new(harness.transport.clone()),
        harness.orchestrator.connection().clone(),
    );
    let first = online.request("shot-1.h5", &wanted).await.unwrap();
    drop(harness);

    // A new session with a producer that can never answer
    let cache = Arc::new(DirCacheStore::open(dir.path()).await.unwrap());
    let offline = CacheOrchestrator::new(
        cache,
        RemoteFetcher::new(Arc::new(MemoryTransport::new(Duration::from_millis(100)))),
        "nobody".into(),
    );
    let second = offline.request("shot-1.h5", &wanted).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(offline.cache_location(), dir.path().display().to_string());
}
