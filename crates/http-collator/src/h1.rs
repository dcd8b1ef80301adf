//! HTTP/1.x incremental parsing
//!
//! Each direction of a tracked stream owns a [`MessageParser`] that walks the
//! accumulated bytes through an explicit state machine:
//!
//! ```text
//! AwaitingStartLine -> AwaitingHeaders -> AwaitingBody(Length | Chunked | UntilClose)
//!         ^                                         |
//!         +------------- message complete ----------+
//! ```
//!
//! A parser only records offsets into the accumulator while a message is in
//! flight. Bytes are drained when a message completes or when a malformed
//! message is discarded, never while waiting for more input, so polling again
//! without new bytes is a no-op.

use bytes::{Buf, Bytes, BytesMut};
use capture_event::TimestampNs;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

/// Longest start line accepted before the message is treated as garbage
pub const MAX_START_LINE_LEN: usize = 8 * 1024;

/// Longest header section accepted before the message is treated as garbage
pub const MAX_HEAD_LEN: usize = 64 * 1024;

/// Default cap on header fields per message
pub const DEFAULT_MAX_HEADERS: usize = 128;

const MAX_METHOD_LEN: usize = 32;
const MAX_CHUNK_LINE_LEN: usize = 1024;

/// Header fields that legitimately repeat. Every other field keeps its first
/// occurrence only.
const MULTI_VALUED: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "cache-control",
    "cookie",
    "link",
    "proxy-authenticate",
    "set-cookie",
    "vary",
    "via",
    "warning",
    "www-authenticate",
];

/// Request line of an HTTP/1.x request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method:  Method,
    /// Request target exactly as sent, non-UTF-8 bytes replaced
    pub target:  String,
    pub version: Version,
}

/// Status line of an HTTP/1.x response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status:  StatusCode,
    pub reason:  String,
}

/// A complete HTTP/1.x message.
#[derive(Debug, Clone)]
pub struct HttpMessage<H> {
    pub head:         H,
    pub headers:      HeaderMap,
    /// Body bytes with any chunked framing removed
    pub body:         Bytes,
    /// When the first byte of the message was observed
    pub started_at:   TimestampNs,
    /// When the final byte of the message was observed
    pub completed_at: TimestampNs,
}

pub type HttpRequest = HttpMessage<RequestHead>;
pub type HttpResponse = HttpMessage<ResponseHead>;

/// How the end of a message body is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body follows the header section
    None,
    /// `Content-Length` bytes follow
    Length(usize),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Everything until the connection closes
    UntilClose,
}

/// Why bytes were thrown away instead of producing a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    InvalidStartLine,
    StartLineTooLong,
    InvalidHeader,
    TooManyHeaders,
    HeadersTooLarge,
    InvalidContentLength,
    InvalidChunkSize,
    MissingChunkTerminator,
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStartLine => write!(f, "invalid HTTP/1.x start line"),
            Self::StartLineTooLong => {
                write!(f, "start line exceeds {MAX_START_LINE_LEN} bytes")
            },
            Self::InvalidHeader => write!(f, "header field syntax violation"),
            Self::TooManyHeaders => write!(f, "too many header fields"),
            Self::HeadersTooLarge => write!(f, "header section exceeds {MAX_HEAD_LEN} bytes"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::InvalidChunkSize => write!(f, "invalid chunk size line"),
            Self::MissingChunkTerminator => write!(f, "chunk data not followed by CRLF"),
        }
    }
}

/// Per-poll inputs that are not part of the byte stream itself
#[derive(Debug, Clone, Copy)]
pub struct PollContext {
    /// Timestamp of the event that triggered this poll
    pub now:          TimestampNs,
    /// The stream has ended; close-delimited bodies may be finalized
    pub closed:       bool,
    /// The response being parsed answers a HEAD request
    pub head_request: bool,
    pub max_headers:  usize,
}

impl PollContext {
    pub fn new(now: TimestampNs) -> Self {
        Self {
            now,
            closed: false,
            head_request: false,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

/// Outcome of one [`MessageParser::poll`] step
#[derive(Debug)]
pub enum Parsed<H> {
    /// More bytes are needed. Nothing was consumed.
    Incomplete,
    /// A message was parsed and its bytes consumed.
    Message(HttpMessage<H>),
    /// `len` bytes were dropped: stray line breaks between messages
    /// (`reason == None`) or a malformed message.
    Discarded {
        len:    usize,
        reason: Option<MalformedReason>,
    },
}

/// The start-line dialect of one direction.
pub trait StartLine: Sized {
    /// Parse a start line, excluding its CRLF.
    fn parse(line: &[u8]) -> Option<Self>;

    /// Whether an unterminated prefix could still become a valid start line.
    fn could_start(prefix: &[u8]) -> bool;

    /// Framing when neither `Content-Length` nor `Transfer-Encoding` is given.
    fn unframed(&self) -> Framing;

    /// Whether the message has no body whatever its headers say.
    fn bodyless(&self, ctx: &PollContext) -> bool;
}

impl StartLine for RequestHead {
    fn parse(line: &[u8]) -> Option<Self> {
        let mut parts = line.split(|&b| b == b' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if method.is_empty() || method.len() > MAX_METHOD_LEN || !is_target(target) {
            return None;
        }

        Some(Self {
            method:  Method::from_bytes(method).ok()?,
            target:  String::from_utf8_lossy(target).into_owned(),
            version: parse_version(version)?,
        })
    }

    fn could_start(prefix: &[u8]) -> bool {
        let method_end = prefix.iter().position(|&b| b == b' ');
        let method = &prefix[..method_end.unwrap_or(prefix.len())];
        if method_end.is_some() && method.is_empty() {
            return false;
        }
        method.len() <= MAX_METHOD_LEN && method.iter().copied().all(is_tchar)
    }

    fn unframed(&self) -> Framing {
        Framing::None
    }

    fn bodyless(&self, _ctx: &PollContext) -> bool {
        false
    }
}

impl StartLine for ResponseHead {
    fn parse(line: &[u8]) -> Option<Self> {
        let mut parts = line.splitn(3, |&b| b == b' ');
        let version = parse_version(parts.next()?)?;
        let code = parts.next()?;
        if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
            return None;
        }

        Some(Self {
            version,
            status: StatusCode::from_bytes(code).ok()?,
            reason: String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned(),
        })
    }

    fn could_start(prefix: &[u8]) -> bool {
        let n = prefix.len().min(5);
        prefix[..n] == b"HTTP/"[..n]
    }

    fn unframed(&self) -> Framing {
        Framing::UntilClose
    }

    fn bodyless(&self, ctx: &PollContext) -> bool {
        ctx.head_request
            || self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
    }
}

fn parse_version(token: &[u8]) -> Option<Version> {
    match token {
        b"HTTP/1.1" => Some(Version::HTTP_11),
        b"HTTP/1.0" => Some(Version::HTTP_10),
        _ => None,
    }
}

/// Visible ASCII or obs-text, at least one byte
fn is_target(target: &[u8]) -> bool {
    !target.is_empty() && target.iter().all(|&b| b.is_ascii_graphic() || b >= 0x80)
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[derive(Debug)]
enum Phase<H> {
    AwaitingStartLine,
    AwaitingHeaders {
        head:   H,
        /// Offset of the first header line
        cursor: usize,
    },
    AwaitingBody {
        head:       H,
        headers:    HeaderMap,
        body_start: usize,
        body:       BodyState,
    },
    /// Skipping a malformed message up to the next blank line
    Resync {
        scan_from: usize,
        reason:    MalformedReason,
    },
}

#[derive(Debug)]
enum BodyState {
    Length(usize),
    Chunked(ChunkedDecoder),
    UntilClose,
}

/// Incremental parser for one direction of one connection.
#[derive(Debug)]
pub struct MessageParser<H> {
    phase:      Phase<H>,
    started_at: Option<TimestampNs>,
}

impl<H: StartLine> Default for MessageParser<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: StartLine> MessageParser<H> {
    pub fn new() -> Self {
        Self {
            phase:      Phase::AwaitingStartLine,
            started_at: None,
        }
    }

    /// True when no message is partially parsed
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::AwaitingStartLine) && self.started_at.is_none()
    }

    /// Forget any partially parsed message. Call whenever the accumulator is
    /// cleared behind the parser's back.
    pub fn reset(&mut self) {
        self.phase = Phase::AwaitingStartLine;
        self.started_at = None;
    }

    /// Advance over `buf`, consuming bytes only for a finished or discarded
    /// message.
    pub fn poll(&mut self, buf: &mut BytesMut, ctx: &PollContext) -> Parsed<H> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::AwaitingStartLine) {
                Phase::AwaitingStartLine => {
                    if buf.is_empty() || buf[..] == *b"\r" {
                        return Parsed::Incomplete;
                    }
                    if buf.starts_with(b"\r\n") {
                        return self.discard(buf, 2, None);
                    }
                    self.started_at.get_or_insert(ctx.now);

                    match find_crlf(buf, 0) {
                        Some(end) => match H::parse(&buf[..end]) {
                            Some(head) => {
                                self.phase = Phase::AwaitingHeaders {
                                    head,
                                    cursor: end + 2,
                                };
                            },
                            None => self.resync(0, MalformedReason::InvalidStartLine),
                        },
                        None if buf.len() > MAX_START_LINE_LEN => {
                            self.resync(0, MalformedReason::StartLineTooLong);
                        },
                        None if !H::could_start(buf) => {
                            self.resync(0, MalformedReason::InvalidStartLine);
                        },
                        None => return Parsed::Incomplete,
                    }
                },

                Phase::AwaitingHeaders { head, cursor } => {
                    let outcome = {
                        let mut slots = vec![httparse::EMPTY_HEADER; ctx.max_headers];
                        match httparse::parse_headers(&buf[cursor..], &mut slots) {
                            Ok(httparse::Status::Complete((len, fields))) => {
                                Ok(Some((cursor + len, collect_headers(fields))))
                            },
                            Ok(httparse::Status::Partial) => Ok(None),
                            Err(e) => Err(e),
                        }
                    };

                    match outcome {
                        Ok(Some((body_start, Ok(headers)))) => {
                            match body_framing(&head, &headers, ctx) {
                                Ok(Framing::None) => {
                                    return self.finish_framed(buf, head, headers, body_start, body_start, ctx);
                                },
                                Ok(Framing::Length(len)) => {
                                    self.phase = Phase::AwaitingBody {
                                        head,
                                        headers,
                                        body_start,
                                        body: BodyState::Length(len),
                                    };
                                },
                                Ok(Framing::Chunked) => {
                                    self.phase = Phase::AwaitingBody {
                                        head,
                                        headers,
                                        body_start,
                                        body: BodyState::Chunked(ChunkedDecoder::new(body_start)),
                                    };
                                },
                                Ok(Framing::UntilClose) => {
                                    self.phase = Phase::AwaitingBody {
                                        head,
                                        headers,
                                        body_start,
                                        body: BodyState::UntilClose,
                                    };
                                },
                                // The header section ends exactly at body_start
                                Err(reason) => return self.discard(buf, body_start, Some(reason)),
                            }
                        },
                        Ok(Some((_, Err(reason)))) => self.resync(cursor, reason),
                        Ok(None) if buf.len() - cursor > MAX_HEAD_LEN => {
                            self.resync(cursor, MalformedReason::HeadersTooLarge);
                        },
                        Ok(None) => {
                            self.phase = Phase::AwaitingHeaders { head, cursor };
                            return Parsed::Incomplete;
                        },
                        Err(httparse::Error::TooManyHeaders) => {
                            self.resync(cursor, MalformedReason::TooManyHeaders);
                        },
                        Err(_) => self.resync(cursor, MalformedReason::InvalidHeader),
                    }
                },

                Phase::AwaitingBody {
                    head,
                    headers,
                    body_start,
                    body,
                } => match body {
                    BodyState::Length(len) if buf.len().saturating_sub(body_start) >= len => {
                        return self.finish_framed(buf, head, headers, body_start, body_start + len, ctx);
                    },
                    BodyState::UntilClose if ctx.closed => {
                        let end = buf.len();
                        return self.finish_framed(buf, head, headers, body_start, end, ctx);
                    },
                    BodyState::Chunked(mut decoder) => match decoder.poll(buf) {
                        Ok(Some(end)) => {
                            buf.advance(end);
                            return self.finish(head, headers, decoder.decoded.freeze(), ctx);
                        },
                        Ok(None) => {
                            self.phase = Phase::AwaitingBody {
                                head,
                                headers,
                                body_start,
                                body: BodyState::Chunked(decoder),
                            };
                            return Parsed::Incomplete;
                        },
                        Err((at, reason)) => self.resync(at, reason),
                    },
                    body => {
                        self.phase = Phase::AwaitingBody {
                            head,
                            headers,
                            body_start,
                            body,
                        };
                        return Parsed::Incomplete;
                    },
                },

                Phase::Resync { scan_from, reason } => match find_crlf_crlf(buf, scan_from) {
                    Some(pos) => return self.discard(buf, pos + 4, Some(reason)),
                    None if ctx.closed => {
                        let len = buf.len();
                        return self.discard(buf, len, Some(reason));
                    },
                    None => {
                        // A terminator may straddle the current end of input
                        self.phase = Phase::Resync {
                            scan_from: buf.len().saturating_sub(3).max(scan_from),
                            reason,
                        };
                        return Parsed::Incomplete;
                    },
                },
            }
        }
    }

    fn resync(&mut self, scan_from: usize, reason: MalformedReason) {
        self.phase = Phase::Resync { scan_from, reason };
    }

    fn discard(&mut self, buf: &mut BytesMut, len: usize, reason: Option<MalformedReason>) -> Parsed<H> {
        buf.advance(len);
        self.reset();
        Parsed::Discarded { len, reason }
    }

    fn finish_framed(
        &mut self,
        buf: &mut BytesMut,
        head: H,
        headers: HeaderMap,
        body_start: usize,
        end: usize,
        ctx: &PollContext,
    ) -> Parsed<H> {
        let message = buf.split_to(end).freeze();
        self.finish(head, headers, message.slice(body_start..), ctx)
    }

    fn finish(&mut self, head: H, headers: HeaderMap, body: Bytes, ctx: &PollContext) -> Parsed<H> {
        let started_at = self.started_at.take().unwrap_or(ctx.now);
        self.phase = Phase::AwaitingStartLine;
        Parsed::Message(HttpMessage {
            head,
            headers,
            body,
            started_at,
            completed_at: ctx.now,
        })
    }
}

/// Build a header map where the first occurrence of a field wins unless the
/// field is known to repeat.
fn collect_headers(fields: &[httparse::Header<'_>]) -> Result<HeaderMap, MalformedReason> {
    let mut map = HeaderMap::with_capacity(fields.len());
    for field in fields {
        let name = HeaderName::from_bytes(field.name.as_bytes())
            .map_err(|_| MalformedReason::InvalidHeader)?;
        let value =
            HeaderValue::from_bytes(field.value).map_err(|_| MalformedReason::InvalidHeader)?;

        if !map.contains_key(&name) || MULTI_VALUED.contains(&name.as_str()) {
            map.append(name, value);
        }
    }
    Ok(map)
}

/// Decide how the body is delimited (RFC 9112 §6.3).
fn body_framing<H: StartLine>(
    head: &H,
    headers: &HeaderMap,
    ctx: &PollContext,
) -> Result<Framing, MalformedReason> {
    if head.bodyless(ctx) {
        return Ok(Framing::None);
    }

    let content_length = headers.get(CONTENT_LENGTH);
    if let Some(te) = headers.get(TRANSFER_ENCODING) {
        if is_chunked(te) {
            return Ok(Framing::Chunked);
        }
        if content_length.is_none() {
            return Ok(Framing::UntilClose);
        }
    }

    match content_length {
        Some(value) => parse_content_length(value)
            .map(Framing::Length)
            .ok_or(MalformedReason::InvalidContentLength),
        None => Ok(head.unframed()),
    }
}

/// Chunked only counts when it is the final transfer coding.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|&b| b == b',')
        .next()
        .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

fn parse_content_length(value: &HeaderValue) -> Option<usize> {
    let digits = value.as_bytes().trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[derive(Debug, Clone, Copy)]
enum ChunkState {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailers,
}

/// Walks `[hex-size][;ext]\r\n[data]\r\n ... 0\r\n[trailers]\r\n`, copying
/// chunk data out as it becomes available.
#[derive(Debug)]
struct ChunkedDecoder {
    /// Absolute offset of the next unread byte
    pos:     usize,
    state:   ChunkState,
    decoded: BytesMut,
}

impl ChunkedDecoder {
    fn new(body_start: usize) -> Self {
        Self {
            pos:     body_start,
            state:   ChunkState::Size,
            decoded: BytesMut::new(),
        }
    }

    /// `Ok(Some(end))` once the last trailer line is read, `Ok(None)` when
    /// more bytes are needed, `Err((offset, reason))` on a framing error.
    fn poll(&mut self, buf: &[u8]) -> Result<Option<usize>, (usize, MalformedReason)> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(end) = find_crlf(buf, self.pos) else {
                        if buf.len() - self.pos > MAX_CHUNK_LINE_LEN {
                            return Err((self.pos, MalformedReason::InvalidChunkSize));
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&buf[self.pos..end])
                        .ok_or((self.pos, MalformedReason::InvalidChunkSize))?;
                    self.pos = end + 2;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                },
                ChunkState::Data { remaining } => {
                    let take = remaining.min(buf.len() - self.pos);
                    self.decoded.extend_from_slice(&buf[self.pos..self.pos + take]);
                    self.pos += take;
                    if take < remaining {
                        self.state = ChunkState::Data {
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }
                    self.state = ChunkState::DataEnd;
                },
                ChunkState::DataEnd => {
                    if buf.len() < self.pos + 2 {
                        return Ok(None);
                    }
                    if buf[self.pos..self.pos + 2] != *b"\r\n" {
                        return Err((self.pos, MalformedReason::MissingChunkTerminator));
                    }
                    self.pos += 2;
                    self.state = ChunkState::Size;
                },
                ChunkState::Trailers => {
                    let Some(end) = find_crlf(buf, self.pos) else {
                        if buf.len() - self.pos > MAX_HEAD_LEN {
                            return Err((self.pos, MalformedReason::HeadersTooLarge));
                        }
                        return Ok(None);
                    };
                    let blank = end == self.pos;
                    self.pos = end + 2;
                    if blank {
                        return Ok(Some(self.pos));
                    }
                },
            }
        }
    }
}

/// Parse a chunk-size line, ignoring chunk extensions after `;`.
fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(semi) => &line[..semi],
        None => line,
    };
    let size = size.trim_ascii();
    if size.is_empty() || !size.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    usize::from_str_radix(std::str::from_utf8(size).ok()?, 16).ok()
}

/// Find the position of `\r\n` starting at `from` in `data`.
fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

/// Find the position of `\r\n\r\n` starting at `from` in `data`.
fn find_crlf_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| from + p)
}

fn parse_one<H: StartLine>(data: &[u8], ctx: &PollContext) -> Option<HttpMessage<H>> {
    let mut buf = BytesMut::from(data);
    let mut parser = MessageParser::<H>::new();
    loop {
        match parser.poll(&mut buf, ctx) {
            Parsed::Message(message) => return Some(message),
            Parsed::Discarded { reason: None, .. } => continue,
            _ => return None,
        }
    }
}

/// Parse one HTTP/1.x request from the start of `data`, returning Some only
/// if it is complete and well formed.
pub fn try_parse_http1_request(data: &[u8], timestamp_ns: TimestampNs) -> Option<HttpRequest> {
    parse_one(data, &PollContext::new(timestamp_ns))
}

/// Parse one HTTP/1.x response from the start of `data`, returning Some only
/// if it is complete and well formed. Close-delimited bodies are incomplete.
pub fn try_parse_http1_response(data: &[u8], timestamp_ns: TimestampNs) -> Option<HttpResponse> {
    parse_one(data, &PollContext::new(timestamp_ns))
}

/// Parse a response as if the connection had just closed, so a body without
/// explicit framing runs to the end of `data` (RFC 9112 §6.3).
pub fn try_finalize_http1_response(data: &[u8], timestamp_ns: TimestampNs) -> Option<HttpResponse> {
    let ctx = PollContext {
        closed: true,
        ..PollContext::new(timestamp_ns)
    };
    parse_one(data, &ctx)
}
