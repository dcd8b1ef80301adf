//! Finished request/response pairs

use std::time::Duration;

use capture_event::{ConnectionId, TimestampNs};
use http::{Method, StatusCode};

/// One HTTP transaction observed on a connection.
///
/// Three shapes occur:
/// - answered: request and response both seen
/// - orphan: a response whose request was never seen (`method`/`target` are
///   `None`), e.g. a connection adopted mid-flight
/// - unanswered: a request still queued when the connection closed
///   (`status` is `None`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Start of the request, or of the response for an orphan
    pub timestamp:          TimestampNs,
    pub connection:         ConnectionId,
    pub process_name:       String,
    pub method:             Option<Method>,
    pub target:             Option<String>,
    pub status:             Option<StatusCode>,
    /// Request completion to response completion
    pub duration:           Option<Duration>,
    pub request_body_size:  usize,
    pub response_body_size: usize,
}

impl Transaction {
    pub fn pid(&self) -> u32 {
        self.connection.pid
    }

    pub fn is_orphan(&self) -> bool {
        self.method.is_none()
    }

    pub fn is_answered(&self) -> bool {
        self.status.is_some()
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}] ", self.connection, self.process_name)?;
        match (&self.method, &self.target) {
            (Some(method), Some(target)) => write!(f, "{method} {target}")?,
            _ => f.write_str("<unknown request>")?,
        }
        match self.status {
            Some(status) => write!(f, " -> {}", status.as_u16())?,
            None => f.write_str(" -> <no response>")?,
        }
        match self.duration {
            Some(duration) => {
                let latency_ms = duration.as_nanos() as f64 / 1_000_000.0;
                write!(f, " ({latency_ms:.2}ms")?;
            },
            None => f.write_str(" (-")?,
        }
        write!(
            f,
            ", req {}B, resp {}B)",
            self.request_body_size, self.response_body_size
        )
    }
}
