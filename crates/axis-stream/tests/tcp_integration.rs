//! Integration tests for the TCP transport.
//!
//! These tests run writer and reader on loopback in the same process and
//! verify step framing, rendezvous and close handshakes end to end.

use std::time::Duration;

use axis_stream::{
    ArrayData, ConnectionParams, DataType, StepStatus, StreamError, StreamResult, StreamTransport,
    TcpTransport, TransportMode, VariableInfo,
};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn params(mode: TransportMode, threading: bool) -> ConnectionParams {
    ConnectionParams {
        address: "127.0.0.1".to_string(),
        port: free_port(),
        timeout: Duration::from_secs(5),
        transport_mode: mode,
        rendezvous_reader_count: 1,
        threading,
    }
}

async fn write_one(transport: TcpTransport, channel: &str, values: Vec<f64>) -> StreamResult<()> {
    let mut writer = transport.open_writer(channel).await?;
    writer
        .declare(VariableInfo::new("signal", DataType::F64, vec![values.len()]))
        .await?;
    writer.begin_step().await?;
    writer.put("signal", &ArrayData::F64(values)).await?;
    writer.end_step().await?;
    writer.close().await
}

async fn read_one(transport: TcpTransport, channel: &str) -> StreamResult<Option<ArrayData>> {
    let mut reader = transport.open_reader(channel).await?;
    let mut received = None;

    loop {
        match reader.begin_step().await? {
            StepStatus::Ok => {
                if reader.has_data("signal") {
                    let info = reader.inquire_variable("signal").expect("declared with data");
                    let mut buffer = info.allocate();
                    reader.get("signal", &mut buffer)?;
                    received = Some(buffer);
                }
                reader.end_step()?;
            }
            StepStatus::EndOfStream => break,
            StepStatus::NotReady => return Err(StreamError::Protocol("not ready".into())),
        }
    }

    reader.close().await?;
    Ok(received)
}

#[tokio::test]
async fn test_step_roundtrip_reliable_threaded() -> StreamResult<()> {
    let transport = TcpTransport::new(params(TransportMode::Reliable, true));

    let writer = tokio::spawn(write_one(transport.clone(), "run-a", vec![1.0, 2.5, -4.0]));
    let received = read_one(transport, "run-a").await?;
    writer.await.unwrap()?;

    assert_eq!(received, Some(ArrayData::F64(vec![1.0, 2.5, -4.0])));
    Ok(())
}

#[tokio::test]
async fn test_step_roundtrip_fast_inline() -> StreamResult<()> {
    let transport = TcpTransport::new(params(TransportMode::Fast, false));

    let writer = tokio::spawn(write_one(transport.clone(), "run-b", vec![9.0]));
    let received = read_one(transport, "run-b").await?;
    writer.await.unwrap()?;

    assert_eq!(received, Some(ArrayData::F64(vec![9.0])));
    Ok(())
}

#[tokio::test]
async fn test_reader_started_before_writer() -> StreamResult<()> {
    let transport = TcpTransport::new(params(TransportMode::Reliable, true));

    let reader = tokio::spawn(read_one(transport.clone(), "late-writer"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    write_one(transport, "late-writer", vec![3.0, 4.0]).await?;

    let received = reader.await.unwrap()?;
    assert_eq!(received, Some(ArrayData::F64(vec![3.0, 4.0])));
    Ok(())
}

#[tokio::test]
async fn test_sequential_channels_share_one_port() -> StreamResult<()> {
    let transport = TcpTransport::new(params(TransportMode::Reliable, true));

    for (index, channel) in ["axisrun", "axis_checkrun", "run"].into_iter().enumerate() {
        let value = index as f64;
        let writer = tokio::spawn(write_one(transport.clone(), channel, vec![value]));
        let received = read_one(transport.clone(), channel).await?;
        writer.await.unwrap()?;
        assert_eq!(received, Some(ArrayData::F64(vec![value])));
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_stream_is_end_of_stream() -> StreamResult<()> {
    let transport = TcpTransport::new(params(TransportMode::Reliable, false));

    let writer_transport = transport.clone();
    let writer = tokio::spawn(async move {
        let mut writer = writer_transport.open_writer("nothing").await?;
        writer.close().await
    });

    let received = read_one(transport, "nothing").await?;
    writer.await.unwrap()?;

    assert!(received.is_none());
    Ok(())
}

#[tokio::test]
async fn test_reader_times_out_without_writer() {
    let mut params = params(TransportMode::Reliable, true);
    params.timeout = Duration::from_millis(300);
    let transport = TcpTransport::new(params);

    let result = transport.open_reader("nobody-home").await;
    assert!(matches!(result, Err(StreamError::Timeout { .. })));
}

#[tokio::test]
async fn test_writer_times_out_without_reader() {
    let mut params = params(TransportMode::Reliable, true);
    params.timeout = Duration::from_millis(300);
    let transport = TcpTransport::new(params);

    let result = transport.open_writer("nobody-listening").await;
    assert!(matches!(result, Err(StreamError::Timeout { .. })));
}

#[tokio::test]
async fn test_reader_for_other_channel_is_rejected() {
    let mut params = params(TransportMode::Reliable, true);
    params.timeout = Duration::from_millis(500);
    let transport = TcpTransport::new(params);

    let writer_transport = transport.clone();
    let writer = tokio::spawn(async move { writer_transport.open_writer("expected").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reader = transport.open_reader("unexpected").await;

    // The reader keeps getting turned away until its deadline
    assert!(matches!(reader, Err(StreamError::ChannelRejected(ref name)) if name == "unexpected"));
    assert!(matches!(
        writer.await.unwrap(),
        Err(StreamError::Timeout { .. })
    ));
}
