//! Daemon and client configuration.
//!
//! Paths accept `~`. The base directory is `~/.warm`, or `$WARM_HOME` when
//! that is set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::framing::DEFAULT_MAX_REQUEST_BYTES;

/// Environment variable overriding the base directory.
pub const WARM_HOME_ENV: &str = "WARM_HOME";

/// Per-connection read timeout on the server.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How long shutdown waits for in-flight connections.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Client connect/read/write timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Base directory holding one subdirectory per service.
pub fn base_dir() -> PathBuf {
    match std::env::var_os(WARM_HOME_ENV) {
        Some(home) if !home.is_empty() => expand_path(Path::new(&home)),
        _ => expand_path(Path::new(crate::DEFAULT_SOCKET_BASE)),
    }
}

/// Expand `~` in a path.
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.as_ref())
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Written after bind, removed at shutdown.
    pub pid_path: Option<PathBuf>,
    pub max_request_bytes: usize,
    /// `None` waits forever for the request line.
    pub read_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: expand_path(socket_path.as_ref()),
            pid_path: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Standard socket and pid paths for `service`.
    pub fn for_service(service: &str) -> Self {
        Self::new(crate::lifecycle::service_socket_path(service))
            .with_pid_path(crate::lifecycle::service_pid_path(service))
    }

    pub fn with_pid_path(mut self, path: impl AsRef<Path>) -> Self {
        self.pid_path = Some(expand_path(path.as_ref()));
        self
    }

    pub fn with_max_request_bytes(mut self, bytes: usize) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: expand_path(socket_path.as_ref()),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn for_service(service: &str) -> Self {
        Self::new(crate::lifecycle::service_socket_path(service))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
