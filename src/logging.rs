//! Daemon logging.
//!
//! Detached daemons log to `<base>/<service>/logs/daemon.log`; foreground
//! runs and the CLI log to stderr. `RUST_LOG` overrides the default level.
//!
//! ```rust,no_run
//! use warm_daemon::logging::init_logging;
//!
//! init_logging("imessage")?;
//! tracing::info!("Daemon started");
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Log directory for a service.
pub fn log_dir(service_name: &str) -> PathBuf {
    crate::lifecycle::service_dir(service_name).join("logs")
}

/// Log file path for a service.
pub fn log_file_path(service_name: &str) -> PathBuf {
    log_dir(service_name).join("daemon.log")
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Log to the service's log file, appending.
pub fn init_logging(service_name: &str) -> Result<()> {
    let log_dir = log_dir(service_name);
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("daemon.log"))
        .context("Failed to open log file")?;

    let subscriber = tracing_subscriber::registry().with(env_filter("info")).with(
        fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
    Ok(())
}

/// Log to stderr.
pub fn init_stderr_logging(default_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
    Ok(())
}

/// Log to a daily-rotated file (`daemon.log.YYYY-MM-DD`).
#[cfg(feature = "log-rotation")]
pub fn init_logging_with_rotation(service_name: &str) -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let log_dir = log_dir(service_name);
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "daemon.log");

    let subscriber = tracing_subscriber::registry().with(env_filter("info")).with(
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
    Ok(())
}
