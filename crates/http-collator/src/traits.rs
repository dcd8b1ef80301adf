//! Traits for abstracting data event sources
//!
//! These traits allow the collator to work with any data source that provides
//! a connection identity, a direction and a payload.

use capture_event::{CaptureEvent, ConnectionId, Direction, TimestampNs};

/// Trait for data events that can be collated into HTTP transactions.
///
/// Implemented for [`CaptureEvent`]; implement it for other sources (pcap,
/// synthetic test events) to feed them through the same tracker.
pub trait DataEvent {
    /// The raw payload bytes of this event
    fn payload(&self) -> &[u8];

    /// Timestamp in nanoseconds (monotonic, for duration calculation)
    fn timestamp_ns(&self) -> TimestampNs;

    /// Direction of the data flow relative to the traced process
    fn direction(&self) -> Direction;

    /// Identity of the byte stream this payload belongs to
    fn connection_id(&self) -> ConnectionId;

    /// Short name of the owning process
    fn process_name(&self) -> &str;
}

impl DataEvent for CaptureEvent {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn timestamp_ns(&self) -> TimestampNs {
        self.timestamp_ns
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn connection_id(&self) -> ConnectionId {
        CaptureEvent::connection_id(self)
    }

    fn process_name(&self) -> &str {
        &self.comm
    }
}
