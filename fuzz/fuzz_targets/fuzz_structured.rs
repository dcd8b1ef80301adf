//! Fuzz target: structured event sequences
//!
//! Generates semi-valid HTTP/1.x traffic spread over a handful of
//! connections, interleaved with close and sweep operations, and drives it
//! through the collator. Checks that buffers stay bounded and that closing a
//! connection always drains it.

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use capture_event::{CaptureEvent, ConnectionId, Direction, TimestampNs};
use http_collator::{Collator, CollatorConfig};
use libfuzzer_sys::fuzz_target;

const MAX_BUFFER: usize = 4096;

const REQUEST_HEADS: &[&[u8]] = &[
    b"GET / HTTP/1.1\r\nHost: a\r\n\r\n",
    b"HEAD /x HTTP/1.1\r\n\r\n",
    b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\n",
    b"PUT /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
];

const RESPONSE_HEADS: &[&[u8]] = &[
    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n",
    b"HTTP/1.1 204 No Content\r\n\r\n",
    b"HTTP/1.1 100 Continue\r\n\r\n",
    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
    b"HTTP/1.0 200 OK\r\n\r\n",
];

#[derive(Debug, Arbitrary)]
enum Op {
    Send {
        conn:     u8,
        template: u8,
        body:     Vec<u8>,
    },
    Recv {
        conn:     u8,
        template: u8,
        body:     Vec<u8>,
    },
    Raw {
        conn:    u8,
        inbound: bool,
        payload: Vec<u8>,
    },
    Close {
        conn: u8,
    },
    Sweep,
}

fn event(conn: u8, direction: Direction, payload: Vec<u8>, now: u64) -> CaptureEvent {
    CaptureEvent {
        timestamp_ns: TimestampNs(now),
        pid: 1,
        tid: 1,
        fd: u32::from(conn % 4),
        direction,
        payload: Bytes::from(payload),
        comm: "fuzz".to_string(),
    }
}

fn templated(heads: &[&[u8]], template: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = heads[template as usize % heads.len()].to_vec();
    out.extend(body);
    out
}

fuzz_target!(|ops: Vec<Op>| {
    let mut collator = Collator::<CaptureEvent>::with_config(CollatorConfig {
        eviction_interval: 7,
        max_buffer_size: MAX_BUFFER,
        ..CollatorConfig::default()
    });

    let mut now = 1_u64;
    for op in ops {
        now += 1_000;
        match op {
            Op::Send { conn, template, body } => {
                let payload = templated(REQUEST_HEADS, template, body);
                let _ = collator.add_event(&event(conn, Direction::Outbound, payload, now));
            },
            Op::Recv { conn, template, body } => {
                let payload = templated(RESPONSE_HEADS, template, body);
                let _ = collator.add_event(&event(conn, Direction::Inbound, payload, now));
            },
            Op::Raw { conn, inbound, payload } => {
                let direction = if inbound { Direction::Inbound } else { Direction::Outbound };
                let _ = collator.add_event(&event(conn, direction, payload, now));
            },
            Op::Close { conn } => {
                let id = ConnectionId::new(1, u32::from(conn % 4));
                let _ = collator.close_connection(&id, TimestampNs(now));
                assert!(collator.tracker().get(&id).is_none());
            },
            Op::Sweep => {
                let _ = collator.sweep(TimestampNs(now));
            },
        }

        for handle in collator.tracker().all() {
            let stream = handle.lock();
            assert!(stream.outbound().len() <= MAX_BUFFER);
            assert!(stream.inbound().len() <= MAX_BUFFER);
        }
    }
});
