//! Daemon lifecycle utilities.
//!
//! Standard per-service paths, PID files, stale socket detection,
//! daemonizing, and stopping a running daemon.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::{base_dir, expand_path};
use crate::error::DaemonError;

/// What is found at a socket path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Nothing there.
    Missing,
    /// A file exists but nobody accepts connections on it.
    Stale,
    /// A daemon is listening.
    Live,
}

/// Directory holding a service's socket, PID file and logs.
pub fn service_dir(service_name: &str) -> PathBuf {
    base_dir().join(service_name)
}

/// Standard socket path for a service.
pub fn service_socket_path(service_name: &str) -> PathBuf {
    service_dir(service_name).join("daemon.sock")
}

/// Standard PID file path for a service.
pub fn service_pid_path(service_name: &str) -> PathBuf {
    service_dir(service_name).join("daemon.pid")
}

/// Detach from the terminal and continue in the background.
///
/// The PID file is left to the server, which writes it once the socket is
/// bound.
///
/// ```rust,no_run
/// use warm_daemon::lifecycle::daemonize;
///
/// daemonize(None)?;
/// // Now running as a daemon
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn daemonize(working_dir: Option<&Path>) -> Result<()> {
    daemonize::Daemonize::new()
        .working_directory(working_dir.unwrap_or(Path::new("/")))
        .start()
        .context("Failed to daemonize process")?;
    Ok(())
}

/// Write the current PID to `pid_file`, creating parent directories.
pub fn write_pid_file(pid_file: impl AsRef<Path>) -> Result<()> {
    let pid_path = expand_path(pid_file.as_ref());
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(&pid_path)
        .with_context(|| format!("Failed to create PID file {}", pid_path.display()))?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// Read a PID file. `None` if it is missing or unparsable.
pub fn read_pid_file(pid_file: impl AsRef<Path>) -> Option<u32> {
    let content = fs::read_to_string(expand_path(pid_file.as_ref())).ok()?;
    content.trim().parse().ok()
}

/// Check if a process with the given PID is running.
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 checks existence without delivering anything.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Probe a socket path with a connect.
pub fn probe_socket(socket_path: impl AsRef<Path>) -> SocketState {
    let socket = socket_path.as_ref();
    if fs::symlink_metadata(socket).is_err() {
        return SocketState::Missing;
    }
    match UnixStream::connect(socket) {
        Ok(_) => SocketState::Live,
        Err(_) => SocketState::Stale,
    }
}

/// Get a socket path ready for binding.
///
/// Creates parent directories and removes a stale socket file. A live
/// daemon on the path is an error.
pub fn prepare_socket_path(socket_path: &Path) -> Result<()> {
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
    }

    match probe_socket(socket_path) {
        SocketState::Missing => Ok(()),
        SocketState::Live => Err(DaemonError::AlreadyRunning {
            path: socket_path.to_path_buf(),
        }
        .into()),
        SocketState::Stale => {
            info!(socket = %socket_path.display(), "Removing stale socket");
            fs::remove_file(socket_path).with_context(|| {
                format!("Failed to remove stale socket {}", socket_path.display())
            })?;
            Ok(())
        }
    }
}

/// Remove a socket file if nothing is listening on it.
///
/// Returns `true` if a stale file was removed.
pub fn cleanup_stale_socket(socket_path: impl AsRef<Path>, pid_file: Option<&Path>) -> Result<bool> {
    let socket = expand_path(socket_path.as_ref());
    if probe_socket(&socket) != SocketState::Stale {
        return Ok(false);
    }

    fs::remove_file(&socket)?;
    if let Some(pid_path) = pid_file {
        let _ = fs::remove_file(expand_path(pid_path));
    }
    Ok(true)
}

/// Remove socket and PID files.
pub fn cleanup_files(socket_path: &Path, pid_file: Option<&Path>) {
    let _ = fs::remove_file(socket_path);
    if let Some(pid_path) = pid_file {
        let _ = fs::remove_file(pid_path);
    }
}

/// Poll until a daemon accepts connections on `socket_path`.
pub fn wait_for_socket(socket_path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if probe_socket(socket_path) == SocketState::Live {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The daemon acknowledged `stop` and released its socket.
    Graceful,
    /// The daemon did not answer; SIGTERM was sent.
    Signalled,
    /// Nothing was running. Leftover files were removed.
    NotRunning,
}

/// Stop the daemon behind `socket_path`.
///
/// Tries the `stop` method first, then SIGTERM to the PID from `pid_file`,
/// and finally removes leftover files.
pub fn stop_daemon(socket_path: &Path, pid_file: Option<&Path>, timeout: Duration) -> Result<StopOutcome> {
    if probe_socket(socket_path) == SocketState::Live {
        match Client::new(socket_path).with_timeout(timeout).stop() {
            Ok(response) if response.ok => {
                let start = Instant::now();
                while start.elapsed() < timeout && probe_socket(socket_path) == SocketState::Live {
                    std::thread::sleep(Duration::from_millis(20));
                }
                info!(socket = %socket_path.display(), "Daemon stopped");
                return Ok(StopOutcome::Graceful);
            }
            Ok(response) => {
                warn!(error = ?response.error, "Daemon refused stop");
            }
            Err(e) => {
                debug!(error = %e, "Stop call failed");
            }
        }
    }

    let mut outcome = StopOutcome::NotRunning;
    if let Some(pid) = pid_file.and_then(|path| read_pid_file(path)) {
        if pid != std::process::id() && is_process_running(pid) {
            info!(pid, "Sending SIGTERM");
            let pid = libc::pid_t::try_from(pid).context("PID out of range")?;
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
            std::thread::sleep(Duration::from_millis(200));
            outcome = StopOutcome::Signalled;
        }
    }

    cleanup_files(socket_path, pid_file);
    Ok(outcome)
}

/// Stop a service at its standard paths.
pub fn stop_service(service_name: &str) -> Result<StopOutcome> {
    let pid_path = service_pid_path(service_name);
    stop_daemon(
        &service_socket_path(service_name),
        Some(&pid_path),
        crate::config::DEFAULT_CLIENT_TIMEOUT,
    )
}

/// Check if a service is accepting connections.
pub fn is_service_running(service_name: &str) -> bool {
    probe_socket(service_socket_path(service_name)) == SocketState::Live
}
