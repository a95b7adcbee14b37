//! Test harness for axis negotiation tests.
//!
//! Provides:
//! - RecordingTransport: wraps a transport and records every channel open
//! - TestHarness: a responder running over an in-process transport, plus
//!   consumer-side handles sharing the same hub

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axis_stream::{
    ArrayData, ChannelReader, ChannelWriter, DataType, MemoryTransport, Payload, StepStatus,
    StreamResult, StreamTransport, VariableInfo,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::descriptor::{ChannelSet, ConnectionId, ACK_VARIABLE};
use crate::fetcher::RemoteFetcher;
use crate::negotiator::AxisNegotiator;
use crate::responder::{AxisResponder, CycleOutcome};
use crate::source::MemorySourceStore;

/// Direction of a recorded channel open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// Transport wrapper that records which channels were opened, in order.
pub struct RecordingTransport {
    inner: Arc<dyn StreamTransport>,
    opened: Arc<Mutex<Vec<(Direction, String)>>>,
}

impl RecordingTransport {
    pub fn new(inner: Arc<dyn StreamTransport>) -> Self {
        Self {
            inner,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> Vec<(Direction, String)> {
        self.opened.lock().unwrap().clone()
    }

    pub fn opened_channels(&self) -> Vec<String> {
        self.opened().into_iter().map(|(_, channel)| channel).collect()
    }
}

#[async_trait]
impl StreamTransport for RecordingTransport {
    async fn open_writer(&self, channel: &str) -> StreamResult<Box<dyn ChannelWriter>> {
        self.opened
            .lock()
            .unwrap()
            .push((Direction::Write, channel.to_string()));
        self.inner.open_writer(channel).await
    }

    async fn open_reader(&self, channel: &str) -> StreamResult<Box<dyn ChannelReader>> {
        self.opened
            .lock()
            .unwrap()
            .push((Direction::Read, channel.to_string()));
        self.inner.open_reader(channel).await
    }
}

/// A responder serving a memory source, and consumer handles that reach it.
pub struct TestHarness {
    pub transport: MemoryTransport,
    pub consumer: Arc<RecordingTransport>,
    pub connection: ConnectionId,
    outcomes: Arc<Mutex<Vec<CycleOutcome>>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestHarness {
    /// Harness whose responder serves until dropped.
    pub fn new(source: MemorySourceStore) -> Self {
        Self::build(source, Duration::from_secs(5), None)
    }

    /// Harness whose responder stops after `cycles` answered requests.
    pub fn serving_cycles(source: MemorySourceStore, cycles: usize, timeout: Duration) -> Self {
        Self::build(source, timeout, Some(cycles))
    }

    /// Harness with no responder at all.
    pub fn without_responder(timeout: Duration) -> Self {
        let transport = MemoryTransport::new(timeout);
        Self {
            consumer: Arc::new(RecordingTransport::new(Arc::new(transport.clone()))),
            transport,
            connection: ConnectionId::unique("test-"),
            outcomes: Arc::new(Mutex::new(Vec::new())),
            shutdown: None,
            handle: None,
        }
    }

    fn build(source: MemorySourceStore, timeout: Duration, cycles: Option<usize>) -> Self {
        let mut harness = Self::without_responder(timeout);

        let responder = AxisResponder::new(
            Arc::new(harness.transport.clone()),
            &harness.connection,
            Arc::new(source),
        );
        let outcomes = harness.outcomes.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let serve = async {
                let mut answered = 0;
                while cycles.map_or(true, |limit| answered < limit) {
                    match responder.serve_one().await {
                        Ok(CycleOutcome::Idle) => {}
                        Ok(outcome) => {
                            outcomes.lock().unwrap().push(outcome);
                            answered += 1;
                        }
                        Err(_) => answered += 1,
                    }
                }
            };
            tokio::select! {
                _ = serve => {}
                _ = shutdown_rx => {}
            }
        });

        harness.shutdown = Some(shutdown_tx);
        harness.handle = Some(handle);
        harness
    }

    pub fn channels(&self) -> ChannelSet {
        ChannelSet::for_connection(&self.connection)
    }

    pub fn negotiator(&self) -> AxisNegotiator {
        AxisNegotiator::new(self.consumer.clone(), &self.connection)
    }

    pub fn fetcher(&self) -> RemoteFetcher {
        RemoteFetcher::new(self.consumer.clone())
    }

    /// Outcomes of the cycles the responder has answered so far.
    pub fn outcomes(&self) -> Vec<CycleOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    /// Wait for a cycle-limited responder to finish.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("responder did not finish")
                .unwrap();
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Build an `f64` payload with the given shape, filled 0, 1, 2, ...
pub fn ramp(shape: Vec<usize>) -> Payload {
    let count = axis_stream::element_count(&shape);
    let values = (0..count).map(|i| i as f64).collect();
    Payload::new(shape, ArrayData::F64(values)).unwrap()
}

/// Write a complete acknowledgment stream as a producer would.
pub async fn write_ack(transport: &dyn StreamTransport, channels: &ChannelSet, found: bool) {
    let mut writer = transport.open_writer(&channels.ack).await.unwrap();
    writer
        .declare(VariableInfo::new(ACK_VARIABLE, DataType::U8, vec![1]))
        .await
        .unwrap();
    writer.begin_step().await.unwrap();
    writer
        .put(ACK_VARIABLE, &ArrayData::U8(vec![u8::from(found)]))
        .await
        .unwrap();
    writer.end_step().await.unwrap();
    writer.close().await.unwrap();
}

/// Read the acknowledgment flag as a consumer would.
pub async fn read_ack(transport: &dyn StreamTransport, channels: &ChannelSet) -> bool {
    let mut reader = transport.open_reader(&channels.ack).await.unwrap();
    assert_eq!(reader.begin_step().await.unwrap(), StepStatus::Ok);

    let mut flag = ArrayData::U8(vec![0]);
    reader.get(ACK_VARIABLE, &mut flag).unwrap();
    reader.end_step().unwrap();

    assert_eq!(reader.begin_step().await.unwrap(), StepStatus::EndOfStream);
    reader.close().await.unwrap();
    flag == ArrayData::U8(vec![1])
}
