//! Capture record decoding
//!
//! Turns the fixed-layout binary records produced by the syscall data probe
//! into typed [`CaptureEvent`]s. Every record is laid out as:
//!
//! ```text
//! offset  size  field
//!      0     8  timestamp (ns, little-endian)
//!      8     4  pid
//!     12     4  tid
//!     16     4  fd
//!     20     1  direction tag (1 = outbound, anything else = inbound)
//!     21     4  declared payload length
//!     25    16  process name (NUL-terminated unless it fills the field)
//!     41     *  payload
//! ```
//!
//! Decoding is pure and lenient about the trailing payload: a declared length
//! that overshoots the record or the 16 KiB cap yields a shorter payload
//! rather than an error.

mod decode;
mod error;
mod event;

pub use decode::decode_record;
pub use error::DecodeError;
pub use event::{CaptureEvent, ConnectionId, Direction, TimestampNs};

/// Size of the nanosecond timestamp field
pub const TIMESTAMP_LEN: usize = 8;

/// Width of the kernel task name field (`TASK_COMM_LEN`)
pub const TASK_COMM_LEN: usize = 16;

/// Bytes preceding the payload in every record
pub const HEADER_LEN: usize = TIMESTAMP_LEN + 4 + 4 + 4 + 1 + 4 + TASK_COMM_LEN;

/// Hard cap on payload bytes carried by one record
pub const MAX_PAYLOAD_LEN: usize = 16384;

/// Direction tag written by the probe for data the process sent
pub const OUTBOUND_TAG: u8 = 1;

/// Direction tag written by the probe for data the process received
pub const INBOUND_TAG: u8 = 2;

#[cfg(test)]
mod tests;
