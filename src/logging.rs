//! Log subscriber installation.
//!
//! `serve` is long-running, so it gets a JSON file rotated daily under the
//! runtime `logs/` directory alongside stderr. The one-shot commands
//! (`ingest`, `plan`, `chat`, ...) only print to stderr.
//!
//! Plaintext findings, plans, tokens, and key material are never logged;
//! call sites log scan ids, artifact names, and error classes only.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated gateway log.
pub const LOG_FILE_PREFIX: &str = "redline.log";

/// Keeps the background log writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// `RUST_LOG` if set, otherwise `info`.
fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the gateway subscriber: JSON lines into
/// `{logs_dir}/redline.log.YYYY-MM-DD` plus plain stderr.
///
/// # Errors
///
/// Fails if `logs_dir` cannot be created or a subscriber is already set.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter_from_env())
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install a stderr-only subscriber. Later calls leave the first one in place.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_writer(std::io::stderr)
        .try_init();
}
