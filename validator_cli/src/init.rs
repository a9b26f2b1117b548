use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Initializes the tracing subscriber, filtered by `RUST_LOG` (default
/// `info`), writing to stderr or appending to `log_file` when given.
pub(crate) fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        None => {
            tracing_subscriber::Registry::default()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::io::stderr)
                        .with_filter(filter),
                )
                .init();
        }
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::Registry::default()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file))
                        .with_filter(filter),
                )
                .init();
        }
    }

    Ok(())
}
