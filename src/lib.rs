//! Passive HTTP/1.x tracing from syscall capture records
//!
//! ```text
//! CaptureSource --records--> decode_record --> Collator --> Sink
//!               --errors---> log
//! ```
//!
//! The decoding, stream tracking and transaction extraction live in the
//! `capture-event` and `http-collator` crates. This crate wires them to a
//! capture source and a sink and runs the ingest loop.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use config::{Cli, TracerConfig};
pub use error::{SourceError, TracerError};
pub use pipeline::{Pipeline, RunSummary};
pub use sink::{FileSink, Sink, SinkFormat, TransactionRecord};
pub use source::{
    CaptureChannels, CaptureSenders, CaptureSource, ReplayInput, ReplaySource, capture_channels,
    encode_replay,
};
