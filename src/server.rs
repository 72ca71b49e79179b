//! UNIX socket server.
//!
//! The [`DaemonServer`] owns the socket, accepts connections and hands each
//! one to its own thread. A connection carries exactly one request line and
//! one response line, then closes.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::DaemonError;
use crate::framing::{self, FramingError};
use crate::lifecycle;
use crate::protocol::{Params, Response};
use crate::registry::{elapsed_ms, Dispatcher, MethodTable};
use crate::service::{MethodInfo, Service};
use crate::shaping::ShapeProfile;

/// Warm daemon server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use warm_daemon::{DaemonServer, MethodTable, Service, ServerConfig};
///
/// struct Notes;
/// impl Service for Notes {
///     fn name(&self) -> &str { "notes" }
///     fn version(&self) -> &str { "1.0.0" }
/// }
///
/// let server = DaemonServer::new(
///     Arc::new(Notes),
///     MethodTable::new(),
///     ServerConfig::for_service("notes"),
/// );
/// server.serve()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct DaemonServer<S: Service> {
    dispatcher: Arc<Dispatcher<S>>,
    config: Arc<ServerConfig>,
    handle: ServerHandle,
}

/// Stops a running [`DaemonServer`] from another thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    stopping: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    socket_path: PathBuf,
}

impl ServerHandle {
    fn new(socket_path: &Path) -> Self {
        Self {
            stopping: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            socket_path: socket_path.to_path_buf(),
        }
    }

    /// Ask the accept loop to exit. In-flight connections finish first.
    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            // Wake the blocking accept.
            let _ = UnixStream::connect(&self.socket_path);
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Connections currently being handled.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Counts a connection as active until dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<S: Service> DaemonServer<S> {
    /// Create a server. `health`, `methods` and `stop` are added to the
    /// table unless it already has them.
    pub fn new(service: Arc<S>, mut table: MethodTable<S>, config: ServerConfig) -> Self {
        let handle = ServerHandle::new(&config.socket_path);

        if !table.contains("stop") {
            let stop = handle.clone();
            table.register(
                MethodInfo::new("stop", "Shut the daemon down after answering"),
                ShapeProfile::unshaped(),
                move |_ctx, _: Params| {
                    info!("Stop requested");
                    stop.stop();
                    Ok(json!({ "message": "Shutting down" }))
                },
            );
        }

        Self {
            dispatcher: Arc::new(Dispatcher::new(service, table)),
            config: Arc::new(config),
            handle,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Bind and serve until stopped (blocking).
    ///
    /// Fails before binding if another daemon is live on the socket path.
    pub fn serve(&self) -> Result<()> {
        let service = self.dispatcher.service();
        service.on_start().context("Service start hook failed")?;

        let socket_path = self.config.socket_path.as_path();
        lifecycle::prepare_socket_path(socket_path)?;

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        if let Some(pid_path) = &self.config.pid_path {
            lifecycle::write_pid_file(pid_path)?;
        }

        info!(
            service = service.name(),
            version = service.version(),
            socket = %socket_path.display(),
            methods = self.dispatcher.table().len(),
            "Daemon started"
        );

        for stream in listener.incoming() {
            if self.handle.is_stopping() {
                break;
            }

            match stream {
                Ok(stream) => self.spawn_connection(stream),
                Err(e) => warn!(error = %e, "Accept error"),
            }
        }

        drop(listener);
        self.drain(self.config.shutdown_grace);

        if let Err(e) = service.on_stop() {
            warn!(error = %e, "Service stop hook failed");
        }
        lifecycle::cleanup_files(socket_path, self.config.pid_path.as_deref());

        info!(service = service.name(), "Daemon stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let guard = ActiveGuard::new(&self.handle.active);
        let dispatcher = Arc::clone(&self.dispatcher);
        let config = Arc::clone(&self.config);

        let spawned = thread::Builder::new()
            .name("warm-conn".into())
            .spawn(move || {
                let _guard = guard;
                if let Err(e) = handle_connection(&dispatcher, &stream, &config) {
                    warn!(error = %e, "Connection error");
                }
            });

        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn connection thread");
        }
    }

    /// Wait for in-flight connections, at most `grace`.
    fn drain(&self, grace: Duration) {
        let start = Instant::now();
        while self.handle.active_connections() > 0 {
            if start.elapsed() >= grace {
                warn!(
                    active = self.handle.active_connections(),
                    "Shutdown grace elapsed with connections still open"
                );
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Read one request line, dispatch it and write the response.
fn handle_connection<S: Service>(
    dispatcher: &Dispatcher<S>,
    stream: &UnixStream,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let start = Instant::now();
    stream.set_read_timeout(config.read_timeout)?;

    let mut reader = BufReader::new(stream);
    let response = match framing::read_line_bounded(&mut reader, config.max_request_bytes) {
        Ok(Some(line)) => dispatcher.handle_line(&line),
        Ok(None) => {
            debug!("Client closed without sending a request");
            return Ok(());
        }
        Err(FramingError::TooLarge { limit }) => {
            warn!(limit, "Request too large");
            Response::from_error(Value::Null, &DaemonError::PayloadTooLarge { limit }, elapsed_ms(start))
        }
        Err(FramingError::Io(e)) => return Err(e),
    };

    let mut writer = stream;
    framing::write_line(&mut writer, &response.to_ndjson_line())
}
