//! Ingest worker
//!
//! One task drains the record and error channels of a capture source,
//! decodes each record, feeds it to the [`Collator`] and hands finished
//! transactions to the [`Sink`]. The run ends when the shutdown token fires
//! or the source closes its record channel. Bytes still buffered for
//! incomplete messages at that point are dropped.

use bytes::Bytes;
use capture_event::decode_record;
use chrono::{DateTime, Local};
use http_collator::{Collator, CollatorConfig, Transaction};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::sink::Sink;
use crate::source::CaptureChannels;

/// Counters reported when a run ends
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub started_at:       DateTime<Local>,
    pub stopped_at:       DateTime<Local>,
    /// Records decoded and fed to the collator
    pub events_processed: u64,
    pub transactions:     u64,
    pub decode_errors:    u64,
    pub source_errors:    u64,
    pub sink_errors:      u64,
    /// The run ended because of the shutdown signal rather than the source
    pub interrupted:      bool,
}

impl RunSummary {
    fn new(started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            stopped_at: started_at,
            events_processed: 0,
            transactions: 0,
            decode_errors: 0,
            source_errors: 0,
            sink_errors: 0,
            interrupted: false,
        }
    }
}

pub struct Pipeline {
    collator: Collator,
}

impl Pipeline {
    pub fn new(config: CollatorConfig) -> Self {
        Self {
            collator: Collator::with_config(config),
        }
    }

    pub fn collator(&self) -> &Collator {
        &self.collator
    }

    /// Run until `shutdown` is cancelled or the record channel closes.
    pub async fn run<S: Sink>(
        &mut self,
        mut channels: CaptureChannels,
        sink: &mut S,
        shutdown: CancellationToken,
    ) -> RunSummary {
        let mut summary = RunSummary::new(Local::now());
        if let Err(e) = sink.write_header(summary.started_at) {
            summary.sink_errors += 1;
            tracing::warn!(error = %e, "failed to write session header");
        }

        let mut errors_open = true;
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, stopping ingest");
                    summary.interrupted = true;
                    break;
                }

                error = channels.errors.recv(), if errors_open => match error {
                    Some(error) => note_source_error(&mut summary, &error),
                    None => errors_open = false,
                },

                record = channels.records.recv() => match record {
                    Some(record) => self.process(record, sink, &mut summary),
                    None => {
                        tracing::info!("capture source closed");
                        break;
                    }
                },
            }
        }

        while let Ok(error) = channels.errors.try_recv() {
            note_source_error(&mut summary, &error);
        }

        summary.stopped_at = Local::now();
        if let Err(e) = sink.write_footer(&summary).and_then(|()| sink.flush()) {
            summary.sink_errors += 1;
            tracing::warn!(error = %e, "failed to write session footer");
        }
        tracing::info!(
            events = summary.events_processed,
            transactions = summary.transactions,
            decode_errors = summary.decode_errors,
            source_errors = summary.source_errors,
            "tracing stopped"
        );
        summary
    }

    fn process<S: Sink>(&mut self, record: Bytes, sink: &mut S, summary: &mut RunSummary) {
        let event = match decode_record(&record) {
            Ok(event) => event,
            Err(e) => {
                summary.decode_errors += 1;
                tracing::warn!(error = %e, "skipping capture record");
                return;
            },
        };
        summary.events_processed += 1;

        for transaction in self.collator.add_event(&event) {
            emit(&transaction, sink, summary);
        }
    }
}

fn emit<S: Sink>(transaction: &Transaction, sink: &mut S, summary: &mut RunSummary) {
    summary.transactions += 1;
    tracing::info!("{transaction}");
    if let Err(e) = sink.write_transaction(transaction) {
        summary.sink_errors += 1;
        tracing::warn!(error = %e, "failed to write transaction");
    }
}

fn note_source_error(summary: &mut RunSummary, error: &SourceError) {
    summary.source_errors += 1;
    tracing::warn!(%error, "capture source error");
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::source::capture_channels;

    /// Sink that fails every write
    struct BrokenSink;

    impl Sink for BrokenSink {
        fn write_header(&mut self, _: DateTime<Local>) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }

        fn write_transaction(&mut self, _: &Transaction) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }

        fn write_footer(&mut self, _: &RunSummary) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_errors_are_not_fatal() {
        let (senders, channels) = capture_channels(4);
        senders.records.send(Bytes::from_static(b"short")).await.unwrap();
        drop(senders);

        let mut pipeline = Pipeline::new(CollatorConfig::default());
        let summary = pipeline
            .run(channels, &mut BrokenSink, CancellationToken::new())
            .await;

        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.sink_errors, 2);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_stops_immediately() {
        let (senders, channels) = capture_channels(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut pipeline = Pipeline::new(CollatorConfig::default());
        let summary = pipeline.run(channels, &mut BrokenSink, shutdown).await;

        assert!(summary.interrupted);
        assert_eq!(summary.events_processed, 0);
        drop(senders);
    }
}
