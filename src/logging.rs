use std::{path::PathBuf, sync::Mutex};

use tokio::sync::RwLock;
use tracing::Level;
use tracing::{debug, info, metadata::LevelFilter, trace};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{prelude::*, EnvFilter};

// Keeps the file writer thread alive until `shutdown`.
static FILE_WRITER_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with: stdout");

    // `RUST_LOG` may narrow things down further, e.g. `serial_bridge::websocket=trace`.
    let stdout_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(stdout_level).into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(stdout_filter);

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let maybe_file_layer = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "bridge.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut slot) = FILE_WRITER_GUARD.lock() {
            *slot = Some(guard);
        }

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        Some(file_layer)
    } else {
        None
    };

    // Tests may have installed something already.
    if registry.with(maybe_file_layer).try_init().is_err() {
        message += " (a global subscriber was already set)";
    }

    debug!(message);
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        do_init(stdout_level, file_logging);

        *initialized = true;

        info!("Logging initialized");
    }
}

/// Flush any buffered file logs.
/// Call this right before exiting.
pub fn shutdown() {
    trace!("Shutting down logging");

    if let Ok(mut slot) = FILE_WRITER_GUARD.lock() {
        // Dropping the guard flushes the writer.
        slot.take();
    }
}
