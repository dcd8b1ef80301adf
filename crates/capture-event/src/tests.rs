use super::*;
use rstest::rstest;

/// Build a raw record with an arbitrary declared length and trailing bytes
fn raw_record(tag: u8, declared_len: u32, comm: &[u8; TASK_COMM_LEN], payload: &[u8]) -> Vec<u8> {
    let mut rec = Vec::new();
    rec.extend_from_slice(&1_700_000_000_123_456_789u64.to_le_bytes());
    rec.extend_from_slice(&100u32.to_le_bytes());
    rec.extend_from_slice(&101u32.to_le_bytes());
    rec.extend_from_slice(&5u32.to_le_bytes());
    rec.push(tag);
    rec.extend_from_slice(&declared_len.to_le_bytes());
    rec.extend_from_slice(comm);
    rec.extend_from_slice(payload);
    rec
}

fn comm(name: &[u8]) -> [u8; TASK_COMM_LEN] {
    let mut field = [0u8; TASK_COMM_LEN];
    field[..name.len()].copy_from_slice(name);
    field
}

#[test]
fn test_header_len_matches_layout() {
    assert_eq!(HEADER_LEN, 41);
}

#[test]
fn test_decode_outbound_request_record() {
    let body = b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n";
    let rec = raw_record(1, body.len() as u32, &comm(b"curl"), body);

    let event = decode_record(&rec).unwrap();
    assert_eq!(event.timestamp_ns, TimestampNs(1_700_000_000_123_456_789));
    assert_eq!(event.pid, 100);
    assert_eq!(event.tid, 101);
    assert_eq!(event.fd, 5);
    assert_eq!(event.direction, Direction::Outbound);
    assert_eq!(event.comm, "curl");
    assert_eq!(&event.payload[..], body);
    assert_eq!(event.connection_id(), ConnectionId::new(100, 5));
}

#[rstest]
#[case::empty(0)]
#[case::one_byte(1)]
#[case::one_short(HEADER_LEN - 1)]
fn test_short_record_is_truncated(#[case] len: usize) {
    let rec = vec![0u8; len];
    assert_eq!(
        decode_record(&rec),
        Err(DecodeError::TruncatedRecord {
            have: len,
            need: HEADER_LEN
        })
    );
}

#[test]
fn test_header_only_record_has_empty_payload() {
    let rec = raw_record(2, 0, &comm(b"nginx"), b"");
    let event = decode_record(&rec).unwrap();
    assert!(event.payload.is_empty());
    assert_eq!(event.direction, Direction::Inbound);
}

#[rstest]
#[case::outbound(1, Direction::Outbound)]
#[case::inbound(2, Direction::Inbound)]
#[case::zero_is_inbound(0, Direction::Inbound)]
#[case::unknown_is_inbound(7, Direction::Inbound)]
#[case::max_is_inbound(255, Direction::Inbound)]
fn test_direction_tag_mapping(#[case] tag: u8, #[case] expected: Direction) {
    let rec = raw_record(tag, 0, &comm(b"app"), b"");
    assert_eq!(decode_record(&rec).unwrap().direction, expected);
}

#[test]
fn test_comm_without_nul_uses_full_field() {
    let full = *b"abcdefghijklmnop";
    let rec = raw_record(1, 0, &full, b"");
    assert_eq!(decode_record(&rec).unwrap().comm, "abcdefghijklmnop");
}

#[test]
fn test_comm_stops_at_first_nul() {
    let mut field = comm(b"web");
    // bytes after the terminator are ignored
    field[5] = b'x';
    let rec = raw_record(1, 0, &field, b"");
    assert_eq!(decode_record(&rec).unwrap().comm, "web");
}

#[test]
fn test_declared_len_longer_than_record_truncates_payload() {
    let rec = raw_record(1, 500, &comm(b"app"), b"hello");
    let event = decode_record(&rec).unwrap();
    assert_eq!(&event.payload[..], b"hello");
}

#[test]
fn test_declared_len_shorter_than_record_ignores_trailing_bytes() {
    let rec = raw_record(1, 3, &comm(b"app"), b"hello");
    let event = decode_record(&rec).unwrap();
    assert_eq!(&event.payload[..], b"hel");
}

#[test]
fn test_payload_capped_at_max_len() {
    let payload = vec![b'a'; MAX_PAYLOAD_LEN + 100];
    let rec = raw_record(1, payload.len() as u32, &comm(b"app"), &payload);
    let event = decode_record(&rec).unwrap();
    assert_eq!(event.payload.len(), MAX_PAYLOAD_LEN);
}

#[test]
fn test_encode_matches_probe_layout() {
    let body = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    let expected = raw_record(2, body.len() as u32, &comm(b"curl"), body);
    let event = decode_record(&expected).unwrap();
    assert_eq!(&event.encode()[..], &expected[..]);
}

#[test]
fn test_encode_truncates_long_comm() {
    let event = CaptureEvent {
        timestamp_ns: TimestampNs(1),
        pid:          1,
        tid:          1,
        fd:           3,
        direction:    Direction::Outbound,
        payload:      bytes::Bytes::from_static(b"x"),
        comm:         "a-very-long-process-name".to_string(),
    };
    let decoded = decode_record(&event.encode()).unwrap();
    assert_eq!(decoded.comm, "a-very-long-proc");
}

#[test]
fn test_connection_id_display() {
    assert_eq!(ConnectionId::new(100, 5).to_string(), "pid=100,fd=5");
}

#[test]
fn test_timestamp_saturating_sub() {
    assert_eq!(TimestampNs(10).saturating_sub(TimestampNs(4)), 6);
    assert_eq!(TimestampNs(4).saturating_sub(TimestampNs(10)), 0);
}
