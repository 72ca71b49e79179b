//! Closed error taxonomy and the single translation into wire errors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::ErrorInfo;

/// Wire error codes. Closed and versioned with the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unparsable JSON or an invalid request envelope
    MalformedRequest,
    /// No handler registered for the method
    UnknownMethod,
    /// Missing or invalid parameter; the message names the field
    ValidationError,
    /// The handler failed
    InternalError,
    /// The request exceeded the framing size cap
    PayloadTooLarge,
    /// Client side: the socket path does not exist
    DaemonNotRunning,
    /// Client side: transport failure against an existing socket
    ConnectFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::MalformedRequest,
        ErrorCode::UnknownMethod,
        ErrorCode::ValidationError,
        ErrorCode::InternalError,
        ErrorCode::PayloadTooLarge,
        ErrorCode::DaemonNotRunning,
        ErrorCode::ConnectFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedRequest => "MALFORMED_REQUEST",
            ErrorCode::UnknownMethod => "UNKNOWN_METHOD",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            ErrorCode::ConnectFailed => "CONNECT_FAILED",
        }
    }

    /// True for codes produced by the client without a daemon answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ErrorCode::DaemonNotRunning | ErrorCode::ConnectFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the daemon or the client can report.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unsupported protocol version {got} (supported: {supported})")]
    UnsupportedVersion { got: u64, supported: u8 },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("{message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("request exceeded {limit} bytes without a newline")]
    PayloadTooLarge { limit: usize },

    #[error("{message}")]
    Internal {
        error_type: String,
        message: String,
        chain: Vec<String>,
    },

    #[error("bundle section '{section}' failed: {source}")]
    Section {
        section: String,
        #[source]
        source: Box<DaemonError>,
    },

    #[error("socket not found: {}", path.display())]
    DaemonNotRunning { path: PathBuf },

    /// Startup only: another daemon answers on the socket path.
    #[error("Another daemon is already listening on {}", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("{message}")]
    ConnectFailed {
        path: PathBuf,
        kind: String,
        message: String,
    },
}

impl DaemonError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        DaemonError::MalformedRequest(reason.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonError::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// `"<field> is required"`.
    pub fn required(field: &str) -> Self {
        Self::validation(field, format!("{field} is required"))
    }

    pub fn internal(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonError::Internal {
            error_type: error_type.into(),
            message: message.into(),
            chain: Vec::new(),
        }
    }

    /// Convert a handler failure.
    ///
    /// A `DaemonError` raised inside a handler keeps its own code; anything
    /// else becomes `INTERNAL_ERROR` with the cause chain attached.
    pub fn from_handler(error: anyhow::Error) -> Self {
        match error.downcast::<DaemonError>() {
            Ok(inner) => inner,
            Err(error) => DaemonError::Internal {
                error_type: "handler_error".into(),
                message: error.to_string(),
                chain: error.chain().skip(1).map(ToString::to_string).collect(),
            },
        }
    }

    /// Convert a caught handler panic.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        DaemonError::internal("panic", message)
    }

    pub fn connect_failed(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        DaemonError::ConnectFailed {
            path: path.into(),
            kind: format!("{:?}", error.kind()),
            message: error.to_string(),
        }
    }

    /// The wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            DaemonError::MalformedRequest(_) | DaemonError::UnsupportedVersion { .. } => {
                ErrorCode::MalformedRequest
            }
            DaemonError::UnknownMethod(_) => ErrorCode::UnknownMethod,
            DaemonError::Validation { .. } => ErrorCode::ValidationError,
            DaemonError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            DaemonError::Internal { .. } | DaemonError::AlreadyRunning { .. } => {
                ErrorCode::InternalError
            }
            DaemonError::Section { source, .. } => source.code(),
            DaemonError::DaemonNotRunning { .. } => ErrorCode::DaemonNotRunning,
            DaemonError::ConnectFailed { .. } => ErrorCode::ConnectFailed,
        }
    }

    /// Structured context for the wire error, if any.
    pub fn details(&self) -> Option<Value> {
        match self {
            DaemonError::MalformedRequest(_) => None,
            DaemonError::UnsupportedVersion { got, supported } => {
                Some(json!({"field": "v", "got": got, "supported": supported}))
            }
            DaemonError::UnknownMethod(method) => Some(json!({"method": method})),
            DaemonError::Validation { field, .. } => {
                field.as_ref().map(|field| json!({"field": field}))
            }
            DaemonError::PayloadTooLarge { limit } => Some(json!({"limit_bytes": limit})),
            DaemonError::Internal {
                error_type, chain, ..
            } => {
                let mut details = json!({"type": error_type});
                if !chain.is_empty() {
                    details["chain"] = json!(chain);
                }
                Some(details)
            }
            DaemonError::Section { section, source } => {
                let mut details = source.details().unwrap_or_else(|| json!({}));
                if let Value::Object(map) = &mut details {
                    map.insert("section".into(), json!(section));
                }
                Some(details)
            }
            DaemonError::DaemonNotRunning { path } => {
                Some(json!({"socket": path.display().to_string()}))
            }
            DaemonError::AlreadyRunning { path } => Some(json!({
                "type": "already_running",
                "socket": path.display().to_string(),
            })),
            DaemonError::ConnectFailed { path, kind, .. } => Some(json!({
                "socket_path": path.display().to_string(),
                "kind": kind,
            })),
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_upper_snake() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, code.as_str());
            let back: ErrorCode = serde_json::from_value(json).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        assert!(serde_json::from_str::<ErrorCode>("\"NOT_FOUND\"").is_err());
    }

    #[test]
    fn test_already_running_is_a_startup_failure() {
        let err = DaemonError::AlreadyRunning {
            path: PathBuf::from("/tmp/x/daemon.sock"),
        };
        let info = err.to_error_info();
        assert_eq!(info.code, ErrorCode::InternalError);
        assert!(info.message.contains("already listening"));
        assert_eq!(info.details.unwrap()["type"], "already_running");
    }

    #[test]
    fn test_required_names_field() {
        let err = DaemonError::required("query");
        assert_eq!(err.to_string(), "query is required");
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.details().unwrap()["field"], "query");
    }

    #[test]
    fn test_from_handler_keeps_daemon_errors() {
        let err = DaemonError::from_handler(anyhow::Error::new(DaemonError::validation(
            "since",
            "since must be an ISO date",
        )));
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_from_handler_wraps_others() {
        let err = DaemonError::from_handler(
            anyhow::anyhow!("disk unplugged").context("reading message store"),
        );
        assert_eq!(err.code(), ErrorCode::InternalError);
        let details = err.details().unwrap();
        assert_eq!(details["type"], "handler_error");
        assert_eq!(details["chain"][0], "disk unplugged");
    }

    #[test]
    fn test_section_error_keeps_inner_code() {
        let err = DaemonError::Section {
            section: "search".into(),
            source: Box::new(DaemonError::internal("handler_error", "boom")),
        };
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.details().unwrap()["section"], "search");
    }

    #[test]
    fn test_transport_codes() {
        assert!(ErrorCode::DaemonNotRunning.is_transport());
        assert!(ErrorCode::ConnectFailed.is_transport());
        assert!(!ErrorCode::InternalError.is_transport());
    }
}
