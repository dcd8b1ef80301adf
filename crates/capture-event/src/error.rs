use thiserror::Error;

/// Failure to decode a single capture record.
///
/// Decode failures are per-record: the caller skips the record and keeps
/// going.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The record is shorter than the fixed header.
    #[error("truncated capture record: have {have} bytes, need at least {need}")]
    TruncatedRecord {
        /// Bytes actually present.
        have: usize,
        /// Fixed header size.
        need: usize,
    },
}
