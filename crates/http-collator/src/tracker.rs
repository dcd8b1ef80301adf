//! Connection table
//!
//! [`StreamTracker`] owns every live [`ByteStream`], keyed by
//! [`ConnectionId`]. The table is a `DashMap<ConnectionId, StreamHandle>`:
//! a shard lock is held only to look up, insert or remove an entry, and
//! payload bytes are copied under the stream's own mutex after the shard
//! lock is released. Locks are always taken shard first, stream second.

use std::time::Duration;

use capture_event::{ConnectionId, TimestampNs};
use dashmap::DashMap;

use crate::stream::{ByteStream, StreamHandle};
use crate::traits::DataEvent;
use crate::{trace_debug, trace_warn};

/// Default per-direction cap on buffered bytes (10 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

pub struct StreamTracker {
    streams:         DashMap<ConnectionId, StreamHandle>,
    max_buffer_size: usize,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::with_max_buffer_size(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a tracker that discards a direction once it buffers more than
    /// `max_buffer_size` bytes.
    pub fn with_max_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            streams: DashMap::new(),
            max_buffer_size,
        }
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Route an event's payload into its connection's accumulator, creating
    /// the connection on first sight.
    ///
    /// A record for a connection marked closed re-opens it: the descriptor
    /// was reused.
    pub fn record<E: DataEvent>(&self, event: &E) -> StreamHandle {
        let id = event.connection_id();
        let handle = self
            .streams
            .entry(id)
            .or_insert_with(|| StreamHandle::new(ByteStream::new(id, event.process_name())))
            .value()
            .clone();

        {
            let mut stream = handle.lock();
            if stream.closed {
                trace_debug!(connection = %id, "re-opening closed stream");
                stream.closed = false;
            }
            if stream.process_name != event.process_name() {
                stream.process_name = event.process_name().to_owned();
            }
            stream.last_activity = stream.last_activity.max(event.timestamp_ns());

            let direction = event.direction();
            if stream.append(direction, event.payload(), self.max_buffer_size) {
                trace_warn!(
                    connection = %id,
                    %direction,
                    limit = self.max_buffer_size,
                    "buffer limit exceeded, discarding buffered bytes"
                );
            }
        }

        handle
    }

    pub fn get(&self, id: &ConnectionId) -> Option<StreamHandle> {
        self.streams.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every tracked stream
    pub fn all(&self) -> Vec<StreamHandle> {
        self.streams.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<StreamHandle> {
        self.streams.remove(id).map(|(_, handle)| handle)
    }

    /// Mark a connection closed. Returns its handle so the caller can run a
    /// final extraction.
    pub fn mark_closed(&self, id: &ConnectionId) -> Option<StreamHandle> {
        let handle = self.get(id)?;
        handle.lock().mark_closed();
        Some(handle)
    }

    /// Close every open stream with no activity for `idle_timeout` and
    /// return the newly closed ones.
    pub fn expire_idle(&self, now: TimestampNs, idle_timeout: Duration) -> Vec<StreamHandle> {
        let timeout_ns = u64::try_from(idle_timeout.as_nanos()).unwrap_or(u64::MAX);
        self.all()
            .into_iter()
            .filter(|handle| {
                let mut stream = handle.lock();
                let expired = !stream.closed && now.saturating_sub(stream.last_activity) >= timeout_ns;
                if expired {
                    trace_debug!(connection = %stream.id, "stream idle, closing");
                    stream.mark_closed();
                }
                expired
            })
            .collect()
    }

    /// Remove streams that are closed and fully drained. A stream someone
    /// else still holds a handle to is kept. Returns the number removed.
    pub fn evict(&self) -> usize {
        let mut removed = 0;
        self.streams.retain(|_, handle| {
            // Handles can only be cloned under the shard lock held here
            let evict = !handle.is_shared() && handle.lock().is_evictable();
            if evict {
                removed += 1;
            }
            !evict
        });
        if removed > 0 {
            trace_debug!(removed, remaining = self.streams.len(), "evicted closed streams");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
