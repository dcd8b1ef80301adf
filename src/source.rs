//! Capture source boundary
//!
//! A source hands the pipeline two channels: raw capture records and
//! asynchronous, non-fatal errors. Dropping the record sender ends the run.
//!
//! [`ReplaySource`] reads records saved as length-delimited frames (4-byte
//! little-endian length, then the record) from a file or stdin. The kernel
//! probe that produces live records plugs in behind the same trait.

use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use capture_event::{HEADER_LEN, MAX_PAYLOAD_LEN};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{Encoder, FramedRead, LengthDelimitedCodec};

use crate::error::{SourceError, TracerError};

/// Default depth of the record and error channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Frames larger than this are rejected by the replay codec
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Receiving half of an open capture source
#[derive(Debug)]
pub struct CaptureChannels {
    pub records: mpsc::Receiver<Bytes>,
    pub errors:  mpsc::Receiver<SourceError>,
}

/// Sending half of an open capture source
#[derive(Debug, Clone)]
pub struct CaptureSenders {
    pub records: mpsc::Sender<Bytes>,
    pub errors:  mpsc::Sender<SourceError>,
}

/// Create a connected record/error channel pair.
pub fn capture_channels(capacity: usize) -> (CaptureSenders, CaptureChannels) {
    let (record_tx, record_rx) = mpsc::channel(capacity);
    let (error_tx, error_rx) = mpsc::channel(capacity);
    (
        CaptureSenders {
            records: record_tx,
            errors:  error_tx,
        },
        CaptureChannels {
            records: record_rx,
            errors:  error_rx,
        },
    )
}

/// Anything that can deliver raw capture records.
pub trait CaptureSource {
    /// Start delivering records. Failing here is fatal for the pipeline.
    fn open(self) -> Result<CaptureChannels, TracerError>;
}

/// Where a [`ReplaySource`] reads from
#[derive(Debug, Clone)]
pub enum ReplayInput {
    Stdin,
    File(PathBuf),
}

/// Replays previously captured records.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    input:    ReplayInput,
    capacity: usize,
}

impl ReplaySource {
    pub fn new(input: ReplayInput) -> Self {
        Self {
            input,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

impl CaptureSource for ReplaySource {
    /// Must be called from within a Tokio runtime.
    fn open(self) -> Result<CaptureChannels, TracerError> {
        let (senders, channels) = capture_channels(self.capacity);
        match self.input {
            ReplayInput::Stdin => {
                tokio::spawn(replay(tokio::io::stdin(), senders));
            },
            ReplayInput::File(path) => {
                let file = std::fs::File::open(&path).map_err(|source| TracerError::SourceUnavailable {
                    reason: format!("cannot open replay file {}", path.display()),
                    source: Some(source),
                })?;
                tokio::spawn(replay(tokio::fs::File::from_std(file), senders));
            },
        }
        Ok(channels)
    }
}

/// Codec for the replay format
pub fn replay_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Encode records in the replay format.
pub fn encode_replay<I>(records: I) -> Result<BytesMut, std::io::Error>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut codec = replay_codec();
    let mut out = BytesMut::new();
    for record in records {
        codec.encode(record, &mut out)?;
    }
    Ok(out)
}

/// Forward every frame of `reader` until EOF, a read error, or the pipeline
/// hanging up.
async fn replay<R>(reader: R, senders: CaptureSenders)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, replay_codec());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(record) => {
                if senders.records.send(record.freeze()).await.is_err() {
                    break;
                }
            },
            Err(e) => {
                let _ = senders.errors.send(SourceError::Read(e)).await;
                break;
            },
        }
    }
    tracing::debug!("replay input exhausted");
}
