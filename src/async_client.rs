//! Async thin client (feature `async-client`).
//!
//! Same round trip and error mapping as [`Client`](crate::Client), on tokio,
//! with the timeout also bounding the connect.

use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::config::{expand_path, DEFAULT_CLIENT_TIMEOUT};
use crate::error::DaemonError;
use crate::protocol::{Params, Request, Response};

const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

/// Async client for one daemon socket.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), warm_daemon::DaemonError> {
/// use warm_daemon::AsyncClient;
///
/// let client = AsyncClient::for_service("imessage");
/// let response = client.call("recent", serde_json::json!({"limit": 5})).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AsyncClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl AsyncClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: expand_path(socket_path.as_ref()),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn for_service(service_name: &str) -> Self {
        Self::new(crate::lifecycle::service_socket_path(service_name))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Response, DaemonError> {
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
        self.send(&Request::new(method, params)).await
    }

    pub async fn health(&self) -> Result<Response, DaemonError> {
        self.call("health", Value::Null).await
    }

    pub async fn send(&self, request: &Request) -> Result<Response, DaemonError> {
        if std::fs::symlink_metadata(&self.socket_path).is_err() {
            return Err(DaemonError::DaemonNotRunning {
                path: self.socket_path.clone(),
            });
        }

        let line = request
            .to_ndjson_line()
            .map_err(|e| DaemonError::malformed(e.to_string()))?;

        let mut stream = self.bounded(UnixStream::connect(&self.socket_path)).await?;
        let written = match self.bounded(stream.write_all(line.as_bytes())).await {
            Ok(()) => self.bounded(stream.flush()).await,
            Err(e) => Err(e),
        };

        // An oversize request is answered before the daemon reads all of it;
        // the reply is still readable after the write fails.
        match (written, self.read_response(stream).await) {
            (Err(write_error), Err(_)) => Err(write_error),
            (_, reply) => reply,
        }
    }

    async fn read_response(&self, stream: UnixStream) -> Result<Response, DaemonError> {
        let mut reply = Vec::new();
        let mut reader = BufReader::new(stream).take(MAX_RESPONSE_BYTES);
        self.bounded(reader.read_until(b'\n', &mut reply)).await?;

        if reply.is_empty() {
            return Err(self.broken("EmptyResponse", "daemon closed the connection without replying"));
        }
        let reply = String::from_utf8_lossy(&reply);
        Response::from_ndjson_line(&reply)
            .map_err(|e| self.broken("InvalidResponse", format!("unparsable response: {e}")))
    }

    /// Run one IO step under the client timeout.
    async fn bounded<T>(
        &self,
        step: impl Future<Output = std::io::Result<T>>,
    ) -> Result<T, DaemonError> {
        match tokio::time::timeout(self.timeout, step).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DaemonError::connect_failed(&self.socket_path, &e)),
            Err(_) => Err(self.broken(
                "TimedOut",
                format!("no response within {}ms", self.timeout.as_millis()),
            )),
        }
    }

    fn broken(&self, kind: &str, message: impl Into<String>) -> DaemonError {
        DaemonError::ConnectFailed {
            path: self.socket_path.clone(),
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}
