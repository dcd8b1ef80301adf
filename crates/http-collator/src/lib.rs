//! HTTP collation library
//!
//! Reassembles per-connection byte streams from individual data events and
//! extracts complete HTTP/1.x request/response transactions from them.
//!
//! - [`StreamTracker`] owns the connection table and appends each payload to
//!   the right directional buffer.
//! - [`TransactionExtractor`] parses buffered bytes incrementally (see
//!   [`h1`]) and pairs responses with requests in arrival order.
//! - [`Collator`] ties the two together for a single ingest loop and
//!   periodically evicts closed connections.
//!
//! # Usage
//!
//! ```ignore
//! use http_collator::Collator;
//!
//! let mut collator = Collator::new();
//! for event in events {
//!     for transaction in collator.add_event(&event) {
//!         println!("{transaction}");
//!     }
//! }
//! ```
//!
//! Any event source works once it implements [`DataEvent`].

mod extractor;
pub mod h1;
mod stream;
mod tracker;
mod traits;
mod transaction;

#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_warn;

#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_debug;

pub use capture_event::{CaptureEvent, ConnectionId, Direction, TimestampNs};
pub use extractor::{ExtractorConfig, TransactionExtractor};
pub use h1::{HttpRequest, HttpResponse};
pub use stream::{ByteStream, StreamHandle};
pub use tracker::{DEFAULT_MAX_BUFFER_SIZE, StreamTracker};
pub use traits::DataEvent;
pub use transaction::Transaction;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the [`Collator`]
#[derive(Debug, Clone)]
pub struct CollatorConfig {
    /// Run the idle sweep and eviction every this many events. 0 disables
    /// the periodic sweep.
    pub eviction_interval: u64,
    /// Close connections with no traffic for this long during a sweep.
    /// `None` leaves connections open until explicitly closed.
    pub idle_timeout:      Option<Duration>,
    /// Maximum buffered bytes per direction before the direction is reset.
    /// Default: 10 MiB.
    pub max_buffer_size:   usize,
    pub extractor:         ExtractorConfig,
}

impl Default for CollatorConfig {
    fn default() -> Self {
        Self {
            eviction_interval: 1000,
            idle_timeout:      Some(Duration::from_secs(30)),
            max_buffer_size:   DEFAULT_MAX_BUFFER_SIZE,
            extractor:         ExtractorConfig::default(),
        }
    }
}

/// Collates individual data events into HTTP transactions.
///
/// Generic over the event type `E` which must implement [`DataEvent`].
pub struct Collator<E: DataEvent = CaptureEvent> {
    tracker:     Arc<StreamTracker>,
    extractor:   TransactionExtractor,
    config:      CollatorConfig,
    events_seen: u64,
    _phantom:    PhantomData<fn(&E)>,
}

impl<E: DataEvent> Default for Collator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DataEvent> Collator<E> {
    /// Create a new collator with default settings
    pub fn new() -> Self {
        Self::with_config(CollatorConfig::default())
    }

    pub fn with_config(config: CollatorConfig) -> Self {
        Self {
            tracker: Arc::new(StreamTracker::with_max_buffer_size(config.max_buffer_size)),
            extractor: TransactionExtractor::with_config(config.extractor.clone()),
            config,
            events_seen: 0,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &CollatorConfig {
        &self.config
    }

    /// The connection table, shareable with readers outside the ingest loop
    pub fn tracker(&self) -> &Arc<StreamTracker> {
        &self.tracker
    }

    /// Events processed so far
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Add a data event and return the transactions it completes
    pub fn add_event(&mut self, event: &E) -> Vec<Transaction> {
        let now = event.timestamp_ns();
        let handle = self.tracker.record(event);
        let mut transactions = self.extractor.extract(&handle, now);
        drop(handle);

        self.events_seen += 1;
        let interval = self.config.eviction_interval;
        if interval > 0 && self.events_seen % interval == 0 {
            transactions.extend(self.sweep(now));
        }
        transactions
    }

    /// Close a connection and flush what it can still produce: a
    /// close-delimited response, and requests that never got an answer.
    pub fn close_connection(&mut self, id: &ConnectionId, now: TimestampNs) -> Vec<Transaction> {
        let Some(handle) = self.tracker.mark_closed(id) else {
            return Vec::new();
        };
        let transactions = self.extractor.extract(&handle, now);
        drop(handle);
        self.tracker.evict();
        transactions
    }

    /// Close idle connections, flush them, then evict every closed and
    /// drained connection.
    pub fn sweep(&mut self, now: TimestampNs) -> Vec<Transaction> {
        let mut transactions = Vec::new();
        if let Some(timeout) = self.config.idle_timeout {
            for handle in self.tracker.expire_idle(now, timeout) {
                transactions.extend(self.extractor.extract(&handle, now));
            }
        }
        self.tracker.evict();
        transactions
    }
}
