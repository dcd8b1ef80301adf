//! Transaction sinks
//!
//! A session writes a header, one entry per transaction and a footer with
//! the run's counters. [`FileSink`] renders either human-readable text or
//! JSON lines.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use http_collator::Transaction;
use serde::Serialize;

use crate::error::TracerError;
use crate::pipeline::RunSummary;

/// Output rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SinkFormat {
    /// Human-readable summary lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Receives finished transactions.
pub trait Sink {
    fn write_header(&mut self, started_at: DateTime<Local>) -> io::Result<()>;

    fn write_transaction(&mut self, transaction: &Transaction) -> io::Result<()>;

    fn write_footer(&mut self, summary: &RunSummary) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// Structured form of a [`Transaction`]
#[derive(Debug, Serialize)]
pub struct TransactionRecord<'a> {
    /// RFC 3339 time of the request start
    pub timestamp:          String,
    pub pid:                u32,
    pub fd:                 u32,
    pub process_name:       &'a str,
    pub method:             Option<&'a str>,
    pub target:             Option<&'a str>,
    pub status:             Option<u16>,
    pub duration_ms:        Option<f64>,
    pub request_body_size:  usize,
    pub response_body_size: usize,
}

impl<'a> From<&'a Transaction> for TransactionRecord<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            timestamp:          wall_clock(tx).to_rfc3339_opts(SecondsFormat::Millis, true),
            pid:                tx.connection.pid,
            fd:                 tx.connection.fd,
            process_name:       &tx.process_name,
            method:             tx.method.as_ref().map(|m| m.as_str()),
            target:             tx.target.as_deref(),
            status:             tx.status.map(|s| s.as_u16()),
            duration_ms:        tx.duration.map(|d| d.as_nanos() as f64 / 1_000_000.0),
            request_body_size:  tx.request_body_size,
            response_body_size: tx.response_body_size,
        }
    }
}

/// Capture timestamps are nanoseconds since the Unix epoch.
fn wall_clock(tx: &Transaction) -> DateTime<Utc> {
    let nanos = i64::try_from(tx.timestamp.0).unwrap_or(i64::MAX);
    Utc.timestamp_nanos(nanos)
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SessionLine<'a> {
    SessionStart {
        started_at: String,
    },
    Transaction(TransactionRecord<'a>),
    SessionEnd {
        stopped_at:       String,
        events_processed: u64,
        transactions:     u64,
        decode_errors:    u64,
        source_errors:    u64,
        sink_errors:      u64,
    },
}

/// Writes a session to any [`Write`] target, usually a buffered file.
pub struct FileSink<W: Write = BufWriter<File>> {
    out:    W,
    format: SinkFormat,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path, format: SinkFormat) -> Result<Self, TracerError> {
        let file = File::create(path).map_err(|source| TracerError::SinkUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

impl<W: Write> FileSink<W> {
    pub fn new(out: W, format: SinkFormat) -> Self {
        Self { out, format }
    }

    pub fn format(&self) -> SinkFormat {
        self.format
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_json(&mut self, line: &SessionLine<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, line)?;
        self.out.write_all(b"\n")
    }
}

impl<W: Write> Sink for FileSink<W> {
    fn write_header(&mut self, started_at: DateTime<Local>) -> io::Result<()> {
        match self.format {
            SinkFormat::Text => writeln!(
                self.out,
                "Tracer started at {}\n",
                started_at.format("%Y-%m-%d %H:%M:%S")
            ),
            SinkFormat::Json => self.write_json(&SessionLine::SessionStart {
                started_at: started_at.to_rfc3339(),
            }),
        }
    }

    fn write_transaction(&mut self, transaction: &Transaction) -> io::Result<()> {
        match self.format {
            SinkFormat::Text => {
                let at = wall_clock(transaction).with_timezone(&Local);
                writeln!(self.out, "{} {}", at.format("%H:%M:%S%.3f"), transaction)
            },
            SinkFormat::Json => {
                self.write_json(&SessionLine::Transaction(TransactionRecord::from(transaction)))
            },
        }
    }

    fn write_footer(&mut self, summary: &RunSummary) -> io::Result<()> {
        match self.format {
            SinkFormat::Text => {
                writeln!(
                    self.out,
                    "\nTracer stopped at {}",
                    summary.stopped_at.format("%Y-%m-%d %H:%M:%S")
                )?;
                writeln!(self.out, "Total events processed: {}", summary.events_processed)?;
                writeln!(self.out, "Total HTTP transactions: {}", summary.transactions)
            },
            SinkFormat::Json => self.write_json(&SessionLine::SessionEnd {
                stopped_at:       summary.stopped_at.to_rfc3339(),
                events_processed: summary.events_processed,
                transactions:     summary.transactions,
                decode_errors:    summary.decode_errors,
                source_errors:    summary.source_errors,
                sink_errors:      summary.sink_errors,
            }),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use capture_event::{ConnectionId, TimestampNs};
    use http::{Method, StatusCode};

    use super::*;

    fn transaction() -> Transaction {
        Transaction {
            // 2024-01-01T00:00:00.250Z
            timestamp:          TimestampNs(1_704_067_200_250_000_000),
            connection:         ConnectionId::new(100, 5),
            process_name:       "curl".to_string(),
            method:             Some(Method::GET),
            target:             Some("/health".to_string()),
            status:             Some(StatusCode::OK),
            duration:           Some(Duration::from_millis(3)),
            request_body_size:  0,
            response_body_size: 12,
        }
    }

    #[test]
    fn test_record_fields() {
        let tx = transaction();
        let record = TransactionRecord::from(&tx);
        assert_eq!(record.timestamp, "2024-01-01T00:00:00.250Z");
        assert_eq!(record.pid, 100);
        assert_eq!(record.fd, 5);
        assert_eq!(record.method, Some("GET"));
        assert_eq!(record.status, Some(200));
        assert_eq!(record.duration_ms, Some(3.0));
    }

    #[test]
    fn test_json_line_is_tagged() {
        let mut sink = FileSink::new(Vec::new(), SinkFormat::Json);
        sink.write_transaction(&transaction()).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["event"], "transaction");
        assert_eq!(value["target"], "/health");
        assert_eq!(value["response_body_size"], 12);
    }

    #[test]
    fn test_orphan_serializes_nulls() {
        let mut tx = transaction();
        tx.method = None;
        tx.target = None;
        tx.duration = None;

        let value = serde_json::to_value(TransactionRecord::from(&tx)).unwrap();
        assert!(value["method"].is_null());
        assert!(value["target"].is_null());
        assert!(value["duration_ms"].is_null());
        assert_eq!(value["status"], 200);
    }

    #[test]
    fn test_text_line_contains_summary() {
        let mut sink = FileSink::new(Vec::new(), SinkFormat::Text);
        sink.write_transaction(&transaction()).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.ends_with("[pid=100,fd=5 curl] GET /health -> 200 (3.00ms, req 0B, resp 12B)\n"));
    }
}
