//! Error types for the tracing pipeline

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the pipeline before it starts
#[derive(Debug, Error)]
pub enum TracerError {
    /// The capture source could not be established
    #[error("capture source unavailable: {reason}")]
    SourceUnavailable {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The output sink could not be created
    #[error("cannot create output {}", path.display())]
    SinkUnavailable {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Non-fatal errors reported by a running capture source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read capture records: {0}")]
    Read(#[from] io::Error),

    /// Records dropped before reaching the pipeline
    #[error("lost {count} capture records")]
    Lost { count: u64 },
}
