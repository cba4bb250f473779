//! Logging for the server and the inspect tool
//!
//! Everything goes through `tracing`. The file sink rotates daily under
//! `$XDG_STATE_HOME/teamlens/`, and the stderr sink is for the server console.
//! `RUST_LOG` wins over `logging.level` when it is set.

use crate::config::{Config, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "teamlens.log";

/// Keeps the background log writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// The returned guard must be held for as long as the process logs.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let filter = build_filter(config);

    let (file_layer, file_guard) = if config.file {
        let log_dir = Config::state_dir();
        std::fs::create_dir_all(&log_dir)?;

        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        level = %config.level,
        file = config.file,
        stderr = config.stderr,
        log_path = %Config::log_path().display(),
        "Logging initialized"
    );

    Ok(LoggingGuard { _file: file_guard })
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}
