use anyhow::{Context, Result};
use clap::Parser;
use http_tracer::{CaptureSource, Cli, FileSink, Pipeline, ReplaySource, TracerConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = TracerConfig::from(Cli::parse());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut sink = FileSink::create(&config.output, config.format)
        .with_context(|| format!("failed to open output {}", config.output.display()))?;
    let channels = ReplaySource::new(config.input.clone())
        .open()
        .context("failed to start capture source")?;

    tracing::info!(output = %config.output.display(), "tracer running, press Ctrl-C to stop");

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let mut pipeline = Pipeline::new(config.collator.clone());
    let summary = pipeline.run(channels, &mut sink, shutdown).await;

    tracing::info!(
        events = summary.events_processed,
        transactions = summary.transactions,
        "results written to {}",
        config.output.display()
    );
    Ok(())
}

/// Cancel `token` on Ctrl-C, or SIGTERM on Unix.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
        }
        () = terminate => {}
    }
    tracing::info!("received shutdown signal");
    token.cancel();
}
