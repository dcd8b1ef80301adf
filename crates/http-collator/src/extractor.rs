//! Transaction extraction
//!
//! Drives both directional parsers of a [`ByteStream`] as far as the
//! buffered bytes allow and pairs each completed response with the oldest
//! unanswered request on the same connection.

use std::time::Duration;

use capture_event::TimestampNs;
use http::{Method, StatusCode};

use crate::h1::{DEFAULT_MAX_HEADERS, HttpRequest, HttpResponse, MalformedReason, Parsed, PollContext};
use crate::stream::{ByteStream, StreamHandle};
use crate::transaction::Transaction;
use crate::{trace_debug, trace_warn};

/// Limits applied while extracting transactions
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Unanswered requests kept per connection. The oldest is dropped when a
    /// new request would exceed this.
    pub max_pending_requests: usize,
    /// Header fields accepted per message
    pub max_headers:          usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: 1024,
            max_headers:          DEFAULT_MAX_HEADERS,
        }
    }
}

/// What is kept of a parsed request until its response arrives
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub(crate) method:       Method,
    pub(crate) target:       String,
    pub(crate) started_at:   TimestampNs,
    pub(crate) completed_at: TimestampNs,
    pub(crate) body_size:    usize,
}

impl From<HttpRequest> for PendingRequest {
    fn from(request: HttpRequest) -> Self {
        Self {
            method:       request.head.method,
            target:       request.head.target,
            started_at:   request.started_at,
            completed_at: request.completed_at,
            body_size:    request.body.len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionExtractor {
    config: ExtractorConfig,
}

impl TransactionExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Lock `handle` and extract every transaction its buffers complete.
    pub fn extract(&self, handle: &StreamHandle, now: TimestampNs) -> Vec<Transaction> {
        let mut stream = handle.lock();
        self.extract_stream(&mut stream, now)
    }

    /// Parse as many complete messages as `stream` holds and return the
    /// transactions they complete. Partial messages stay buffered, so calling
    /// this again without new bytes returns nothing.
    ///
    /// On a closed stream, close-delimited bodies are finalized, any bytes
    /// that still do not form a message are dropped and requests left
    /// without a response are emitted as unanswered.
    pub fn extract_stream(&self, stream: &mut ByteStream, now: TimestampNs) -> Vec<Transaction> {
        let mut ctx = PollContext::new(now);
        ctx.closed = stream.closed;
        ctx.max_headers = self.config.max_headers;

        let mut transactions: Vec<Transaction> = std::mem::take(&mut stream.abandoned)
            .into_iter()
            .map(|request| unanswered(stream, request))
            .collect();

        self.parse_requests(stream, &ctx);
        transactions.extend(self.parse_responses(stream, &mut ctx));

        if stream.closed {
            finalize(stream, &mut transactions);
        }
        transactions
    }

    fn parse_requests(&self, stream: &mut ByteStream, ctx: &PollContext) {
        loop {
            match stream.requests.poll(&mut stream.outbound, ctx) {
                Parsed::Incomplete => break,
                Parsed::Message(request) => {
                    if stream.pending.len() >= self.config.max_pending_requests {
                        let _dropped = stream.pending.pop_front();
                        trace_warn!(
                            connection = %stream.id,
                            limit = self.config.max_pending_requests,
                            "too many unanswered requests, dropping the oldest"
                        );
                    }
                    stream.pending.push_back(request.into());
                },
                Parsed::Discarded { len, reason } => note_discard(stream, len, reason, "request"),
            }
        }
    }

    fn parse_responses(&self, stream: &mut ByteStream, ctx: &mut PollContext) -> Vec<Transaction> {
        let mut transactions = Vec::new();
        loop {
            ctx.head_request = stream
                .pending
                .front()
                .is_some_and(|request| request.method == Method::HEAD);

            match stream.responses.poll(&mut stream.inbound, ctx) {
                Parsed::Incomplete => break,
                Parsed::Message(response) if is_interim(response.head.status) => {
                    trace_debug!(
                        connection = %stream.id,
                        status = response.head.status.as_u16(),
                        "skipping interim response"
                    );
                },
                Parsed::Message(response) => {
                    let request = stream.pending.pop_front();
                    transactions.push(pair(stream, request, response));
                },
                Parsed::Discarded { len, reason } => note_discard(stream, len, reason, "response"),
            }
        }
        transactions
    }
}

/// 1xx responses precede the final response to the same request. 101 ends
/// HTTP/1.x on the connection and is the final response.
fn is_interim(status: StatusCode) -> bool {
    status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn note_discard(stream: &mut ByteStream, len: usize, reason: Option<MalformedReason>, kind: &'static str) {
    // Stray CRLFs between messages carry no reason
    let Some(reason) = reason else {
        return;
    };
    stream.malformed += 1;
    trace_warn!(connection = %stream.id, kind, discarded = len, %reason, "skipping malformed HTTP message");
}

fn pair(stream: &ByteStream, request: Option<PendingRequest>, response: HttpResponse) -> Transaction {
    match request {
        Some(request) => Transaction {
            timestamp:          request.started_at,
            connection:         stream.id,
            process_name:       stream.process_name.clone(),
            method:             Some(request.method),
            target:             Some(request.target),
            status:             Some(response.head.status),
            duration:           Some(Duration::from_nanos(
                response.completed_at.saturating_sub(request.completed_at),
            )),
            request_body_size:  request.body_size,
            response_body_size: response.body.len(),
        },
        None => {
            trace_debug!(
                connection = %stream.id,
                status = response.head.status.as_u16(),
                "response without a matching request"
            );
            Transaction {
                timestamp:          response.started_at,
                connection:         stream.id,
                process_name:       stream.process_name.clone(),
                method:             None,
                target:             None,
                status:             Some(response.head.status),
                duration:           None,
                request_body_size:  0,
                response_body_size: response.body.len(),
            }
        },
    }
}

fn finalize(stream: &mut ByteStream, transactions: &mut Vec<Transaction>) {
    if !stream.outbound.is_empty() || !stream.inbound.is_empty() {
        trace_debug!(
            connection = %stream.id,
            outbound = stream.outbound.len(),
            inbound = stream.inbound.len(),
            "dropping incomplete data on closed stream"
        );
        stream.outbound.clear();
        stream.inbound.clear();
    }
    stream.requests.reset();
    stream.responses.reset();

    for request in std::mem::take(&mut stream.pending) {
        transactions.push(unanswered(stream, request));
    }
}

fn unanswered(stream: &ByteStream, request: PendingRequest) -> Transaction {
    Transaction {
        timestamp:          request.started_at,
        connection:         stream.id,
        process_name:       stream.process_name.clone(),
        method:             Some(request.method),
        target:             Some(request.target),
        status:             None,
        duration:           None,
        request_body_size:  request.body_size,
        response_body_size: 0,
    }
}
