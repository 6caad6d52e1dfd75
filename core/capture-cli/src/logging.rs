//! Logging setup for the `capture` binary.
//!
//! Logs go to stderr and to a daily rolling file under `~/.capture/logs`.
//! `CAPTURE_DEBUG_LOG=1` forces debug level; otherwise `RUST_LOG` applies,
//! defaulting to info.

use std::env;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "CAPTURE_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "capture.log";

/// Keeps the file writer flushing until dropped at process exit.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn log_dir() -> Option<PathBuf> {
    let dir = capture_sdk::config::capture_dir().ok()?.join("logs");
    fs_err::create_dir_all(&dir).ok()?;
    Some(dir)
}

pub fn init() -> LoggingGuard {
    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    // File logging is best effort; stderr alone is enough to run.
    let (file_layer, file_guard) = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LoggingGuard {
        _file_guard: file_guard,
    }
}
