//! Structured logging setup shared by all four binaries: a console layer
//! plus a size/count-bounded rotating file sink under
//! `<basedir>/logs/<appname>.log`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global tracing subscriber. Must be called once, near the
/// start of `main`. Returns the appender's worker guard, which must be kept
/// alive for the process lifetime or buffered log lines are dropped.
pub fn init(basedir: &Path, appname: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = basedir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{appname}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
