use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// JSON events to a daily rolling file under `log_dir`; optionally a compact stderr layer.
///
/// The interactive console belongs to the prompter, so stderr logging is opt-in.
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init_tracing(log_dir: &Path, log_stderr: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "jupiter-cli.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(file_writer)
        .with_ansi(false);

    let stderr_layer = log_stderr.then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}
