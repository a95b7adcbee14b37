//! In-process transport.
//!
//! Channels rendezvous by name in a shared hub. Whichever side opens first
//! creates the pipe; frames written before the reader arrives are buffered.
//! Once both ends have been handed out the name is free again, so the next
//! cycle on the same name gets a fresh pipe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::channel::{ChannelReader, ChannelWriter, StreamTransport};
use crate::error::{StreamError, StreamResult};
use crate::protocol::Frame;
use crate::step::{FrameSink, FrameSource, StepReader, StepWriter};

struct Rendezvous {
    sender: Option<UnboundedSender<Frame>>,
    receiver: Option<UnboundedReceiver<Frame>>,
}

impl Rendezvous {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }
}

/// Transport whose channels live inside this process.
///
/// Cloning shares the hub, so a producer and a consumer holding clones of
/// the same transport can talk to each other.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Mutex<HashMap<String, Rendezvous>>>,
    timeout: Duration,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl MemoryTransport {
    /// Create a hub whose readers give up on a step after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            hub: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Channel names with a pipe still waiting for one of its ends.
    pub fn pending_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hub.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn take_sender(&self, channel: &str) -> StreamResult<UnboundedSender<Frame>> {
        let mut hub = self.hub.lock();

        // A pipe whose sender is gone was written and never read; drop it.
        if hub.get(channel).is_some_and(|r| r.sender.is_none()) {
            debug!(channel = %channel, "Discarding unread stream");
            hub.remove(channel);
        }

        // A reader that gave up and closed leaves a pipe nobody will drain.
        if hub
            .get(channel)
            .and_then(|r| r.sender.as_ref())
            .is_some_and(UnboundedSender::is_closed)
        {
            debug!(channel = %channel, "Replacing pipe of a closed reader");
            hub.remove(channel);
        }

        let rendezvous = hub.entry(channel.to_string()).or_insert_with(Rendezvous::new);
        let sender = rendezvous.sender.take().ok_or_else(|| {
            StreamError::Protocol(format!("channel '{}' already has a writer", channel))
        })?;
        if rendezvous.receiver.is_none() {
            hub.remove(channel);
        }
        Ok(sender)
    }

    fn take_receiver(&self, channel: &str) -> StreamResult<UnboundedReceiver<Frame>> {
        let mut hub = self.hub.lock();

        if hub.get(channel).is_some_and(|r| r.receiver.is_none()) {
            debug!(channel = %channel, "Replacing abandoned reader");
            hub.remove(channel);
        }

        let rendezvous = hub.entry(channel.to_string()).or_insert_with(Rendezvous::new);
        let receiver = rendezvous.receiver.take().ok_or_else(|| {
            StreamError::Protocol(format!("channel '{}' already has a reader", channel))
        })?;
        if rendezvous.sender.is_none() {
            hub.remove(channel);
        }
        Ok(receiver)
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn open_writer(&self, channel: &str) -> StreamResult<Box<dyn ChannelWriter>> {
        let sink = MemorySink {
            channel: channel.to_string(),
            sender: Some(self.take_sender(channel)?),
        };
        Ok(Box::new(StepWriter::new(channel, sink)))
    }

    async fn open_reader(&self, channel: &str) -> StreamResult<Box<dyn ChannelReader>> {
        let source = MemorySource {
            receiver: self.take_receiver(channel)?,
        };
        Ok(Box::new(StepReader::new(channel, source, self.timeout)))
    }
}

struct MemorySink {
    channel: String,
    sender: Option<UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> StreamResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StreamError::Closed(self.channel.clone()))?;
        sender
            .send(frame)
            .map_err(|_| StreamError::Disconnected(self.channel.clone()))
    }

    async fn finish(&mut self) -> StreamResult<()> {
        self.sender = None;
        Ok(())
    }
}

struct MemorySource {
    receiver: UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> StreamResult<Option<Frame>> {
        Ok(self.receiver.recv().await)
    }

    async fn acknowledge_close(&mut self) -> StreamResult<()> {
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StepStatus;
    use crate::payload::{ArrayData, DataType, VariableInfo};

    #[tokio::test]
    async fn test_write_before_read_is_buffered() {
        let transport = MemoryTransport::default();

        let mut writer = transport.open_writer("run-1").await.unwrap();
        writer
            .declare(VariableInfo::new("x", DataType::I32, vec![2]))
            .await
            .unwrap();
        writer.begin_step().await.unwrap();
        writer.put("x", &ArrayData::I32(vec![4, 5])).await.unwrap();
        writer.end_step().await.unwrap();
        writer.close().await.unwrap();

        let mut reader = transport.open_reader("run-1").await.unwrap();
        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::Ok);

        let info = reader.inquire_variable("x").unwrap();
        assert_eq!(info.shape, vec![2]);

        let mut buffer = info.allocate();
        reader.get("x", &mut buffer).unwrap();
        assert_eq!(buffer, ArrayData::I32(vec![4, 5]));
        reader.end_step().unwrap();

        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::EndOfStream);
        reader.close().await.unwrap();

        assert!(transport.pending_channels().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_without_data() {
        let transport = MemoryTransport::default();

        let mut writer = transport.open_writer("empty").await.unwrap();
        writer.close().await.unwrap();

        let mut reader = transport.open_reader("empty").await.unwrap();
        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::EndOfStream);
        // Stays ended
        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::EndOfStream);
    }

    #[tokio::test]
    async fn test_reader_not_ready_on_timeout() {
        let transport = MemoryTransport::new(Duration::from_millis(50));

        let _writer = transport.open_writer("slow").await.unwrap();
        let mut reader = transport.open_reader("slow").await.unwrap();

        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::NotReady);
    }

    #[tokio::test]
    async fn test_writer_dropped_without_close_is_disconnect() {
        let transport = MemoryTransport::default();

        let writer = transport.open_writer("vanish").await.unwrap();
        let mut reader = transport.open_reader("vanish").await.unwrap();
        drop(writer);

        assert!(matches!(
            reader.begin_step().await,
            Err(StreamError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_declaration_and_data_in_separate_steps() {
        let transport = MemoryTransport::default();
        let mut writer = transport.open_writer("split").await.unwrap();
        let mut reader = transport.open_reader("split").await.unwrap();

        writer
            .declare(VariableInfo::new("v", DataType::F64, vec![1]))
            .await
            .unwrap();
        writer.begin_step().await.unwrap();
        writer.end_step().await.unwrap();
        writer.begin_step().await.unwrap();
        writer.put("v", &ArrayData::F64(vec![9.5])).await.unwrap();
        writer.end_step().await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::Ok);
        assert!(reader.inquire_variable("v").is_some());
        assert!(!reader.has_data("v"));
        reader.end_step().unwrap();

        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::Ok);
        assert!(reader.has_data("v"));
        reader.end_step().unwrap();
    }

    #[tokio::test]
    async fn test_put_outside_step_rejected() {
        let transport = MemoryTransport::default();
        let mut writer = transport.open_writer("strict").await.unwrap();
        writer
            .declare(VariableInfo::new("v", DataType::U8, vec![1]))
            .await
            .unwrap();

        let result = writer.put("v", &ArrayData::U8(vec![1])).await;
        assert!(matches!(result, Err(StreamError::NotInStep(_))));
    }

    #[tokio::test]
    async fn test_put_must_match_declaration() {
        let transport = MemoryTransport::default();
        let mut writer = transport.open_writer("typed").await.unwrap();
        writer
            .declare(VariableInfo::new("v", DataType::U8, vec![2]))
            .await
            .unwrap();
        writer.begin_step().await.unwrap();

        let result = writer.put("v", &ArrayData::U8(vec![1, 2, 3])).await;
        assert!(matches!(result, Err(StreamError::BufferMismatch { .. })));

        let result = writer.put("undeclared", &ArrayData::U8(vec![1])).await;
        assert!(matches!(result, Err(StreamError::UnknownVariable(_))));
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let transport = MemoryTransport::default();
        let mut writer = transport.open_writer("done").await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.begin_step().await,
            Err(StreamError::Closed(_))
        ));

        let mut reader = transport.open_reader("done").await.unwrap();
        reader.close().await.unwrap();
        assert!(matches!(reader.begin_step().await, Err(StreamError::Closed(_))));
    }

    #[tokio::test]
    async fn test_writer_after_idle_reader_gets_fresh_pipe() {
        let transport = MemoryTransport::new(Duration::from_millis(50));

        // Reader arrives first, sees nothing and leaves
        let mut idle = transport.open_reader("late").await.unwrap();
        assert_eq!(idle.begin_step().await.unwrap(), StepStatus::NotReady);
        idle.close().await.unwrap();
        assert_eq!(transport.pending_channels(), vec!["late".to_string()]);

        let mut writer = transport.open_writer("late").await.unwrap();
        writer
            .declare(VariableInfo::new("v", DataType::U8, vec![1]))
            .await
            .unwrap();
        writer.begin_step().await.unwrap();
        writer.put("v", &ArrayData::U8(vec![3])).await.unwrap();
        writer.end_step().await.unwrap();
        writer.close().await.unwrap();

        let mut reader = transport.open_reader("late").await.unwrap();
        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::Ok);
        assert!(reader.has_data("v"));
        reader.end_step().unwrap();
        assert_eq!(reader.begin_step().await.unwrap(), StepStatus::EndOfStream);
    }

    #[tokio::test]
    async fn test_fresh_pipe_per_cycle() {
        let transport = MemoryTransport::default();

        for value in [1u8, 2u8] {
            let mut writer = transport.open_writer("cycle").await.unwrap();
            writer
                .declare(VariableInfo::new("v", DataType::U8, vec![1]))
                .await
                .unwrap();
            writer.begin_step().await.unwrap();
            writer.put("v", &ArrayData::U8(vec![value])).await.unwrap();
            writer.end_step().await.unwrap();
            writer.close().await.unwrap();

            let mut reader = transport.open_reader("cycle").await.unwrap();
            assert_eq!(reader.begin_step().await.unwrap(), StepStatus::Ok);
            let mut buffer = ArrayData::zeros(DataType::U8, 1);
            reader.get("v", &mut buffer).unwrap();
            assert_eq!(buffer, ArrayData::U8(vec![value]));
            reader.end_step().unwrap();
            reader.close().await.unwrap();
        }
    }
}
