//! Fuzz target: capture record decoding
//!
//! Feeds random bytes to the record decoder. Decoding must never panic, and
//! whatever decodes must respect the payload bound and re-encode to a record
//! that decodes to the same event.

#![no_main]

use capture_event::{HEADER_LEN, MAX_PAYLOAD_LEN, decode_record};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = decode_record(data) else {
        assert!(data.len() < HEADER_LEN);
        return;
    };

    assert!(event.payload.len() <= MAX_PAYLOAD_LEN);
    assert!(event.payload.len() <= data.len() - HEADER_LEN);

    let reencoded = event.encode();
    let again = decode_record(&reencoded).expect("encoded record decodes");
    assert_eq!(again.payload, event.payload);
    assert_eq!(again.timestamp_ns, event.timestamp_ns);
    assert_eq!(again.connection_id(), event.connection_id());
    assert_eq!(again.direction, event.direction);
});
