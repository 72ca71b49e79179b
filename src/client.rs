//! Thin client.
//!
//! One connection per call: connect, write the request line, read the
//! response line. No retries. Any failure to complete the round trip is a
//! [`DaemonError`] with a transport code; a daemon-reported failure is a
//! normal [`Response`] with `ok == false`.

use serde_json::{json, Value};
use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::{expand_path, ClientConfig, DEFAULT_CLIENT_TIMEOUT};
use crate::error::DaemonError;
use crate::framing;
use crate::protocol::{Params, Request, Response};

/// Responses larger than this are treated as a broken round trip.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Process exit code: the daemon answered `ok: true`.
pub const EXIT_OK: i32 = 0;
/// Process exit code: the daemon answered `ok: false`.
pub const EXIT_DAEMON_ERROR: i32 = 1;
/// Process exit code: no response was received.
pub const EXIT_TRANSPORT_ERROR: i32 = 2;

/// Client for one daemon socket.
///
/// ```rust,no_run
/// use warm_daemon::Client;
///
/// let client = Client::for_service("imessage");
/// let response = client.call("unread_count", serde_json::json!({}))?;
/// println!("{:?}", response.result);
/// # Ok::<(), warm_daemon::DaemonError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Client {
    /// Client for an explicit socket path (supports `~`).
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: expand_path(socket_path.as_ref()),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    /// Client for a service's standard socket path.
    pub fn for_service(service_name: &str) -> Self {
        Self::new(crate::lifecycle::service_socket_path(service_name))
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.socket_path).with_timeout(config.timeout)
    }

    /// Connect, read and write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call a method. `params` must be an object or `null`.
    pub fn call(&self, method: &str, params: Value) -> Result<Response, DaemonError> {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Params::new(),
            other => {
                return Err(DaemonError::validation(
                    "params",
                    format!("params must be a JSON object, got {other}"),
                ))
            }
        };
        self.send(&Request::new(method, params))
    }

    pub fn health(&self) -> Result<Response, DaemonError> {
        self.call("health", Value::Null)
    }

    pub fn methods(&self) -> Result<Response, DaemonError> {
        self.call("methods", Value::Null)
    }

    pub fn stop(&self) -> Result<Response, DaemonError> {
        self.call("stop", Value::Null)
    }

    /// Perform one round trip.
    pub fn send(&self, request: &Request) -> Result<Response, DaemonError> {
        if std::fs::symlink_metadata(&self.socket_path).is_err() {
            return Err(DaemonError::DaemonNotRunning {
                path: self.socket_path.clone(),
            });
        }

        let line = request
            .to_ndjson_line()
            .map_err(|e| DaemonError::malformed(e.to_string()))?;

        debug!(method = %request.method, id = %request.id, socket = %self.socket_path.display(), "Sending request");

        let transport = |e: std::io::Error| DaemonError::connect_failed(&self.socket_path, &e);

        let mut stream = UnixStream::connect(&self.socket_path).map_err(transport)?;
        stream.set_read_timeout(Some(self.timeout)).map_err(transport)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(transport)?;

        // A daemon that rejects an oversize request answers and closes before
        // reading all of it, so a failed write may still have a reply queued.
        let written = stream.write_all(line.as_bytes()).and_then(|()| stream.flush());
        let reply = self.read_response(&stream);
        match (written, reply) {
            (Err(write_error), Err(_)) => Err(transport(write_error)),
            (_, reply) => reply,
        }
    }

    fn read_response(&self, stream: &UnixStream) -> Result<Response, DaemonError> {
        let mut reader = BufReader::new(stream);
        let reply = match framing::read_line_bounded(&mut reader, MAX_RESPONSE_BYTES) {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err(self.broken("EmptyResponse", "daemon closed the connection without replying")),
            Err(framing::FramingError::TooLarge { limit }) => {
                return Err(self.broken("ResponseTooLarge", format!("response exceeded {limit} bytes")))
            }
            Err(framing::FramingError::Io(e)) => {
                return Err(DaemonError::connect_failed(&self.socket_path, &e))
            }
        };

        let reply = String::from_utf8_lossy(&reply);
        Response::from_ndjson_line(&reply)
            .map_err(|e| self.broken("InvalidResponse", format!("unparsable response: {e}")))
    }

    fn broken(&self, kind: &str, message: impl Into<String>) -> DaemonError {
        DaemonError::ConnectFailed {
            path: self.socket_path.clone(),
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Exit code for a finished (or failed) call.
pub fn exit_code(outcome: &Result<Response, DaemonError>) -> i32 {
    match outcome {
        Ok(response) if response.ok => EXIT_OK,
        Ok(_) => EXIT_DAEMON_ERROR,
        Err(_) => EXIT_TRANSPORT_ERROR,
    }
}

/// How [`render`] prints an outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Print the whole response envelope.
    pub raw_response: bool,
    pub pretty: bool,
    /// Forces single-line output.
    pub minimal: bool,
}

/// The JSON document the CLI prints for an outcome.
///
/// Success prints `result`; any failure prints `{ok: false, error}`.
pub fn output_document(outcome: &Result<Response, DaemonError>, raw_response: bool) -> Value {
    match outcome {
        Ok(response) if raw_response => serde_json::to_value(response)
            .unwrap_or_else(|e| json!({"ok": false, "error": {"code": "INTERNAL_ERROR", "message": e.to_string()}})),
        Ok(response) if response.ok => response.result.clone().unwrap_or(Value::Null),
        Ok(response) => json!({ "ok": false, "error": response.error }),
        Err(error) => json!({ "ok": false, "error": error.to_error_info() }),
    }
}

/// Render an outcome as the text the CLI prints (without trailing newline).
pub fn render(outcome: &Result<Response, DaemonError>, options: RenderOptions) -> String {
    let document = output_document(outcome, options.raw_response);
    let pretty = options.pretty && !options.minimal;
    let text = if pretty {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    };
    text.unwrap_or_else(|_| document.to_string())
}
