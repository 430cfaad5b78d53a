//! Tracing setup.
//!
//! Console output by default; with `-l` a non-blocking file writer, plus the
//! console again when `-s` is given. `RUST_LOG` overrides the flag-selected
//! level.

use crate::config::Cli;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer flushing. Hold until the process exits.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the global subscriber from the command line.
pub fn init(cli: &Cli) -> anyhow::Result<LogGuard> {
    let Some(level) = cli.level() else {
        return Ok(LogGuard { _file: None });
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let (file_layer, guard) = match cli.log_file.as_deref() {
        Some(path) => match open_log(path) {
            Ok((writer, guard)) => (
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false),
                ),
                Some(guard),
            ),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}, using stdout", path.display(), e);
                (None, None)
            }
        },
        None => (None, None),
    };

    let stdout_layer = (file_layer.is_none() || cli.stdout).then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_thread_names(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(LogGuard { _file: guard })
}

fn open_log(
    path: &Path,
) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    // Appends to an existing log across restarts.
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(tracing_appender::non_blocking(file))
}
