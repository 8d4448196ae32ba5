//! Tracing setup for the `membrane` binary.
//!
//! `simulate --log-dir` runs use [`init_production`]: every bus transition,
//! policy decision and crossing is written as one flattened JSON object per
//! line to a daily-rotated file, and mirrored to stderr. All other commands
//! use [`init_cli`], which keeps stdout free for command output.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Prefix of the rotated log files (`membrane.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "membrane.log";

/// Filter for production runs when `RUST_LOG` is unset.
const PRODUCTION_FILTER: &str = "info";

/// Filter for one-shot commands when `RUST_LOG` is unset.
const CLI_FILTER: &str = "warn";

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes buffered records and closes the log file, so
/// hold it until the simulation has finished.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the JSON file layer plus a stderr layer.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created or a global subscriber is
/// already installed. The directory is created before the subscriber.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter_or(PRODUCTION_FILTER))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_writer(writer),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install a stderr-only subscriber for `schedule`, `validate`, `redact` and
/// plain `simulate` runs.
///
/// A subscriber installed earlier in the process is kept.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(CLI_FILTER))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
