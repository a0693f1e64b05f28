//! Logging setup for `kam`.
//!
//! Two sinks share one `EnvFilter`:
//! - stderr, for the user at the terminal
//! - `~/.kamui/logs/kam.log.<date>`, rolled daily, so the detached watcher
//!   (whose stderr is discarded) still leaves a trail
//!
//! Level: `KAMUI_LOG` (default `warn`); `-v` or `KAMUI_DEBUG_LOG=1` forces `debug`.

use std::env;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Target for the final error event; it is printed to stderr separately.
pub const EXIT_TARGET: &str = "kam::exit";

const LOG_FILE_PREFIX: &str = "kam.log";

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init(verbose: bool) -> Option<WorkerGuard> {
    let filter = if verbose || debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("KAMUI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter_fn(|meta| meta.target() != EXIT_TARGET));

    let (file_layer, guard) = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn debug_enabled() -> bool {
    env::var("KAMUI_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn log_dir() -> Option<PathBuf> {
    let dir = kamui_core::storage::kamui_home_dir()?.join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
