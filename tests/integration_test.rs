//! End-to-end runs of the pipeline: encoded capture records in, sink
//! output out.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use capture_event::{CaptureEvent, Direction, TimestampNs};
use http_collator::CollatorConfig;
use http_tracer::{
    CaptureSource, FileSink, Pipeline, ReplayInput, ReplaySource, SinkFormat, TracerError,
    capture_channels, encode_replay,
};
use tokio_util::sync::CancellationToken;

fn record(fd: u32, ts: u64, direction: Direction, payload: &'static [u8]) -> Bytes {
    CaptureEvent {
        timestamp_ns: TimestampNs(ts),
        pid: 100,
        tid: 100,
        fd,
        direction,
        payload: Bytes::from_static(payload),
        comm: "curl".to_string(),
    }
    .encode()
}

fn health_check(fd: u32, ts: u64) -> [Bytes; 2] {
    [
        record(fd, ts, Direction::Outbound, b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n"),
        record(fd, ts + 1_000_000, Direction::Inbound, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
    ]
}

fn json_lines(out: Vec<u8>) -> Vec<serde_json::Value> {
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_replay_file_to_json_sink() {
    let mut records = Vec::new();
    records.extend(health_check(5, 1_000_000_000));
    records.extend(health_check(6, 2_000_000_000));

    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(&encode_replay(records).unwrap()).unwrap();
    input.flush().unwrap();

    let channels = ReplaySource::new(ReplayInput::File(input.path().to_path_buf()))
        .open()
        .unwrap();
    let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
    let mut pipeline = Pipeline::new(CollatorConfig::default());

    let summary = pipeline
        .run(channels, &mut sink, CancellationToken::new())
        .await;

    assert_eq!(summary.events_processed, 4);
    assert_eq!(summary.transactions, 2);
    assert_eq!(summary.decode_errors, 0);
    assert!(!summary.interrupted);

    let lines = json_lines(sink.into_inner());
    assert_eq!(lines.len(), 4, "header, two transactions, footer");
    assert_eq!(lines[0]["event"], "session_start");
    assert_eq!(lines[1]["event"], "transaction");
    assert_eq!(lines[1]["method"], "GET");
    assert_eq!(lines[1]["target"], "/health");
    assert_eq!(lines[1]["status"], 200);
    assert_eq!(lines[1]["pid"], 100);
    assert_eq!(lines[1]["fd"], 5);
    assert_eq!(lines[1]["duration_ms"], 1.0);
    assert_eq!(lines[2]["fd"], 6);
    assert_eq!(lines[3]["event"], "session_end");
    assert_eq!(lines[3]["events_processed"], 4);
    assert_eq!(lines[3]["transactions"], 2);
}

#[tokio::test]
async fn test_text_sink_file_has_header_and_footer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("http-trace.txt");

    let (senders, channels) = capture_channels(16);
    for rec in health_check(5, 1_000) {
        senders.records.send(rec).await.unwrap();
    }
    drop(senders);

    let mut sink = FileSink::create(&path, SinkFormat::Text).unwrap();
    let summary = Pipeline::new(CollatorConfig::default())
        .run(channels, &mut sink, CancellationToken::new())
        .await;
    drop(sink);

    assert_eq!(summary.transactions, 1);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("Tracer started at "));
    assert!(text.contains("[pid=100,fd=5 curl] GET /health -> 200"));
    assert!(text.contains("Total events processed: 2\n"));
    assert!(text.ends_with("Total HTTP transactions: 1\n"));
}

#[tokio::test]
async fn test_corrupt_records_are_skipped() {
    let (senders, channels) = capture_channels(16);
    let [request, response] = health_check(5, 1_000);

    senders.records.send(request).await.unwrap();
    senders.records.send(Bytes::from_static(b"too short")).await.unwrap();
    senders.records.send(response).await.unwrap();
    drop(senders);

    let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
    let summary = Pipeline::new(CollatorConfig::default())
        .run(channels, &mut sink, CancellationToken::new())
        .await;

    assert_eq!(summary.decode_errors, 1);
    assert_eq!(summary.events_processed, 2);
    assert_eq!(summary.transactions, 1);
}

#[tokio::test]
async fn test_source_errors_are_counted_not_fatal() {
    let (senders, channels) = capture_channels(16);
    senders
        .errors
        .send(http_tracer::SourceError::Lost { count: 3 })
        .await
        .unwrap();
    for rec in health_check(5, 1_000) {
        senders.records.send(rec).await.unwrap();
    }
    drop(senders);

    let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
    let summary = Pipeline::new(CollatorConfig::default())
        .run(channels, &mut sink, CancellationToken::new())
        .await;

    assert_eq!(summary.source_errors, 1);
    assert_eq!(summary.transactions, 1);
}

#[tokio::test]
async fn test_truncated_replay_reports_read_error() {
    let mut encoded = encode_replay(health_check(5, 1_000)).unwrap().to_vec();
    encoded.extend_from_slice(&[0xff, 0x00, 0x00, 0x00, 0x01]);

    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(&encoded).unwrap();
    input.flush().unwrap();

    let channels = ReplaySource::new(ReplayInput::File(input.path().to_path_buf()))
        .open()
        .unwrap();
    let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
    let summary = Pipeline::new(CollatorConfig::default())
        .run(channels, &mut sink, CancellationToken::new())
        .await;

    assert_eq!(summary.transactions, 1);
    assert_eq!(summary.source_errors, 1);
}

#[tokio::test]
async fn test_missing_replay_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = ReplaySource::new(ReplayInput::File(dir.path().join("absent.bin"))).open();
    assert!(matches!(result, Err(TracerError::SourceUnavailable { .. })));
}

#[test]
fn test_unwritable_output_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = FileSink::create(&dir.path().join("missing/dir/trace.txt"), SinkFormat::Text);
    assert!(matches!(result, Err(TracerError::SinkUnavailable { .. })));
}

#[tokio::test]
async fn test_shutdown_drops_incomplete_messages() {
    let (senders, channels) = capture_channels(16);
    let shutdown = CancellationToken::new();

    senders
        .records
        .send(record(5, 1_000, Direction::Outbound, b"GET /slow HTTP/1.1\r\n\r\n"))
        .await
        .unwrap();
    senders
        .records
        .send(record(5, 2_000, Direction::Inbound, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial"))
        .await
        .unwrap();

    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
            let summary = Pipeline::new(CollatorConfig::default())
                .run(channels, &mut sink, shutdown)
                .await;
            (summary, sink.into_inner())
        })
    };

    // Let the worker drain both records before signalling
    while !senders.records.is_closed() && senders.records.capacity() < senders.records.max_capacity() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let (summary, out) = worker.await.unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.events_processed, 2);
    assert_eq!(summary.transactions, 0, "no partial transaction at shutdown");

    let lines = json_lines(out);
    assert_eq!(lines.last().unwrap()["event"], "session_end");
    drop(senders);
}

#[tokio::test]
async fn test_idle_connection_flushed_on_sweep() {
    let config = CollatorConfig {
        eviction_interval: 2,
        idle_timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let (senders, channels) = capture_channels(16);

    // Unanswered request on fd 7, then unrelated traffic three seconds later
    senders
        .records
        .send(record(7, 0, Direction::Outbound, b"GET /lost HTTP/1.1\r\n\r\n"))
        .await
        .unwrap();
    senders
        .records
        .send(record(8, 3_000_000_000, Direction::Outbound, b"GET /x HTTP/1.1\r\n"))
        .await
        .unwrap();
    drop(senders);

    let mut pipeline = Pipeline::new(config);
    let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
    let summary = pipeline
        .run(channels, &mut sink, CancellationToken::new())
        .await;

    assert_eq!(summary.transactions, 1);
    let lines = json_lines(sink.into_inner());
    assert_eq!(lines[1]["target"], "/lost");
    assert!(lines[1]["status"].is_null());
    assert_eq!(pipeline.collator().tracker().len(), 1);
}
