//! Typed capture events and the identity types derived from them

use bytes::Bytes;

use crate::{INBOUND_TAG, OUTBOUND_TAG};

/// Newtype for nanosecond-precision capture timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampNs(pub u64);

impl TimestampNs {
    /// Returns `self - other`, clamped to zero on underflow.
    pub fn saturating_sub(self, other: TimestampNs) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl std::fmt::Display for TimestampNs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl From<u64> for TimestampNs {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<TimestampNs> for u64 {
    fn from(v: TimestampNs) -> Self {
        v.0
    }
}

/// Identity of one full-duplex byte stream: a descriptor within a process.
///
/// Descriptor numbers are recycled by the kernel, so two unrelated
/// connections opened one after the other can share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    pub pid: u32,
    pub fd:  u32,
}

impl ConnectionId {
    pub fn new(pid: u32, fd: u32) -> Self {
        Self { pid, fd }
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid={},fd={}", self.pid, self.fd)
    }
}

/// Direction of a captured payload relative to the traced process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data the process wrote (requests, for a client)
    Outbound,
    /// Data the process read (responses, for a client)
    Inbound,
}

impl Direction {
    /// Map a raw probe tag. Only [`OUTBOUND_TAG`] is outbound; every other
    /// value, including unknown ones, is treated as inbound.
    pub fn from_tag(tag: u8) -> Self {
        if tag == OUTBOUND_TAG {
            Self::Outbound
        } else {
            Self::Inbound
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Outbound => OUTBOUND_TAG,
            Self::Inbound => INBOUND_TAG,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outbound => f.write_str("SEND"),
            Self::Inbound => f.write_str("RECV"),
        }
    }
}

/// One decoded syscall data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub timestamp_ns: TimestampNs,
    pub pid:          u32,
    pub tid:          u32,
    pub fd:           u32,
    pub direction:    Direction,
    /// Payload bytes, at most [`crate::MAX_PAYLOAD_LEN`]
    pub payload:      Bytes,
    /// Process name as reported by the kernel (`comm`)
    pub comm:         String,
}

impl CaptureEvent {
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.pid, self.fd)
    }
}
