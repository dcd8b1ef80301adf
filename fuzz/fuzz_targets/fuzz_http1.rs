//! Fuzz target: HTTP/1.x parsing
//!
//! Feeds random bytes to the request and response parsers, whole and split
//! in two. The parsers must never panic, and a poll that returns
//! `Incomplete` must not consume anything.

#![no_main]

use bytes::BytesMut;
use capture_event::TimestampNs;
use http_collator::h1::{self, MessageParser, Parsed, PollContext, RequestHead, ResponseHead, StartLine};
use libfuzzer_sys::fuzz_target;

fn drive<H: StartLine>(data: &[u8], split: usize) {
    let mut parser = MessageParser::<H>::new();
    let mut buf = BytesMut::from(&data[..split]);
    let mut ctx = PollContext::new(TimestampNs(1));

    for (step, tail) in [&data[split..], &[][..]].into_iter().enumerate() {
        buf.extend_from_slice(tail);
        ctx.closed = step == 1;
        loop {
            let before = buf.len();
            match parser.poll(&mut buf, &ctx) {
                Parsed::Incomplete => {
                    assert_eq!(buf.len(), before);
                    break;
                },
                Parsed::Message(_) => assert!(buf.len() < before),
                Parsed::Discarded { len, .. } => assert_eq!(buf.len() + len, before),
            }
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let _ = h1::try_parse_http1_request(data, TimestampNs(0));
    let _ = h1::try_parse_http1_response(data, TimestampNs(0));
    let _ = h1::try_finalize_http1_response(data, TimestampNs(0));

    let split = data.first().map_or(0, |b| *b as usize % (data.len() + 1));
    drive::<RequestHead>(data, split);
    drive::<ResponseHead>(data, split);
});
