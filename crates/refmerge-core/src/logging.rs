use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Initialize logging on stderr, plus a log file under `data_dir` when
/// enabled in settings. Stdout is left for merge output.
///
/// Returns a guard that must be held for the lifetime of the application
/// to ensure file log messages are flushed.
pub fn init_logging(
    settings: &LoggingSettings,
    data_dir: &Path,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));
    if !settings.file {
        let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    }

    let log_dir = data_dir.join(&settings.dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::never(&log_dir, "refmerge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(Some(guard))
}
