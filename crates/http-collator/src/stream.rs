//! Per-connection byte stream state

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use capture_event::{ConnectionId, Direction, TimestampNs};

use crate::extractor::PendingRequest;
use crate::h1::{MessageParser, RequestHead, ResponseHead};

/// Both directions of one tracked connection.
///
/// The two accumulators are independent: bytes keep their arrival order
/// within a direction, but nothing records how outbound and inbound writes
/// interleaved.
#[derive(Debug)]
pub struct ByteStream {
    pub(crate) id:            ConnectionId,
    pub(crate) process_name:  String,
    pub(crate) outbound:      BytesMut,
    pub(crate) inbound:       BytesMut,
    pub(crate) closed:        bool,
    pub(crate) last_activity: TimestampNs,

    // Parse state for each direction. The parsers hold offsets into the
    // matching accumulator and must be reset whenever it is cleared.
    pub(crate) requests:  MessageParser<RequestHead>,
    pub(crate) responses: MessageParser<ResponseHead>,

    /// Requests parsed but not yet answered, oldest first
    pub(crate) pending: VecDeque<PendingRequest>,
    /// Requests whose response was lost to an inbound overflow, waiting to
    /// be reported as unanswered
    pub(crate) abandoned: Vec<PendingRequest>,

    pub(crate) overflows: u64,
    pub(crate) malformed: u64,
}

impl ByteStream {
    pub fn new(id: ConnectionId, process_name: impl Into<String>) -> Self {
        Self {
            id,
            process_name: process_name.into(),
            outbound: BytesMut::new(),
            inbound: BytesMut::new(),
            closed: false,
            last_activity: TimestampNs(0),
            requests: MessageParser::new(),
            responses: MessageParser::new(),
            pending: VecDeque::new(),
            abandoned: Vec::new(),
            overflows: 0,
            malformed: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Bytes the traced process sent that have not been parsed yet
    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Bytes the traced process received that have not been parsed yet
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Signal that no more bytes will arrive for this connection.
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn last_activity(&self) -> TimestampNs {
        self.last_activity
    }

    /// Both accumulators are empty
    pub fn is_drained(&self) -> bool {
        self.outbound.is_empty() && self.inbound.is_empty()
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Times a direction was discarded for exceeding the buffer cap
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// Malformed messages skipped on this connection
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.closed && self.is_drained() && self.abandoned.is_empty()
    }

    /// Append `payload` to the accumulator for `direction`.
    ///
    /// If the result would exceed `max_buffered`, the buffered bytes of that
    /// direction and its parse progress are thrown away first. Returns true
    /// when that happened. A payload that alone exceeds the cap is dropped
    /// as well.
    ///
    /// Inbound bytes that overflow belong to the response for the oldest
    /// unanswered request, so that request is moved to `abandoned` and the
    /// next response pairs with the request after it.
    pub(crate) fn append(&mut self, direction: Direction, payload: &[u8], max_buffered: usize) -> bool {
        let buffered = match direction {
            Direction::Outbound => self.outbound.len(),
            Direction::Inbound => self.inbound.len(),
        };
        let overflow = buffered.saturating_add(payload.len()) > max_buffered;

        if overflow {
            self.overflows += 1;
            match direction {
                Direction::Outbound => {
                    self.outbound.clear();
                    self.requests.reset();
                },
                Direction::Inbound => {
                    self.inbound.clear();
                    self.responses.reset();
                    self.abandoned.extend(self.pending.pop_front());
                },
            }
        }

        if payload.len() <= max_buffered {
            match direction {
                Direction::Outbound => self.outbound.extend_from_slice(payload),
                Direction::Inbound => self.inbound.extend_from_slice(payload),
            }
        }
        overflow
    }
}

/// Shared reference to a tracked [`ByteStream`].
///
/// Handles stay valid after the stream leaves the tracker; a stream is only
/// evicted while no handle other than the tracker's own exists.
#[derive(Debug, Clone)]
pub struct StreamHandle(pub(crate) Arc<Mutex<ByteStream>>);

impl StreamHandle {
    pub fn new(stream: ByteStream) -> Self {
        Self(Arc::new(Mutex::new(stream)))
    }

    /// Lock the stream, recovering the guard if a holder panicked.
    pub fn lock(&self) -> MutexGuard<'_, ByteStream> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }
}
