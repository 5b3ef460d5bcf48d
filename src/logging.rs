//! Logging setup: daily-rotating file logger plus optional console
//! mirroring, built from plain data rather than a closure.
//!
//! Daily file rotation mirrors a `TimedRotatingFileHandler` policy, built
//! on `tracing_subscriber::registry()`. Because a Worker is a freshly
//! re-exec'd process, `init` is called once at the top of every process
//! entry point (Supervisor or Worker) with the logging configuration it
//! was handed as plain fields — never a thunk captured from the parent,
//! since there is no parent to share it with.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{StunError, StunResult};

pub struct LoggingConfig<'a> {
    pub log_level: &'a str,
    pub log_to_console: bool,
    pub log_path: Option<&'a std::path::Path>,
}

/// Install the global tracing subscriber. Returns a guard that must be
/// held for the lifetime of the process — dropping it stops the
/// non-blocking file writer from flushing.
pub fn init(config: LoggingConfig) -> StunResult<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("revtun={}", config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);

    match config.log_path {
        Some(log_path) => {
            let directory = log_path.parent().unwrap_or(std::path::Path::new("."));
            let file_stem = log_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "revtun.log".to_string());

            std::fs::create_dir_all(directory)
                .map_err(|e| StunError::Config(format!("cannot create log directory {}: {e}", directory.display())))?;

            let appender = tracing_appender::rolling::daily(directory, file_stem);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

            if config.log_to_console {
                registry
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer())
                    .try_init()
                    .map_err(|e| StunError::Config(e.to_string()))?;
            } else {
                registry
                    .with(file_layer)
                    .try_init()
                    .map_err(|e| StunError::Config(e.to_string()))?;
            }
            Ok(Some(guard))
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .map_err(|e| StunError::Config(e.to_string()))?;
            Ok(None)
        }
    }
}
