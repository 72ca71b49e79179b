//! Wire protocol types for NDJSON communication over a UNIX socket.
//!
//! Every message is a single line of compact JSON terminated by `\n`.
//! A connection carries exactly one [`Request`] and one [`Response`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;

use crate::error::{DaemonError, ErrorCode};
use crate::PROTOCOL_VERSION;

/// Method parameters: a JSON object.
pub type Params = Map<String, Value>;

/// NDJSON request from client to daemon.
///
/// # Example
/// ```json
/// {"id":"abc123","v":1,"method":"text_search","params":{"query":"dinner","limit":5}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Client-generated correlation id (UUID v4 by default).
    ///
    /// Any JSON value is accepted and echoed back unchanged; absent means
    /// `null`.
    #[serde(default)]
    pub id: Value,
    /// Protocol version (missing means 1)
    #[serde(default = "default_version")]
    pub v: u64,
    /// Method name (e.g., "health", "recent", "bundle")
    pub method: String,
    /// Method parameters; `null` or absent means `{}`
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Params,
}

/// NDJSON response from daemon to client.
///
/// # Example (success)
/// ```json
/// {"id":"abc123","ok":true,"result":{"count":2},"meta":{"server_ms":0.4,"protocol_v":1}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Request ID (echoed from request, `null` if none could be read)
    #[serde(default)]
    pub id: Value,
    /// Success flag
    pub ok: bool,
    /// Result data (only when `ok`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information (only when not `ok`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Server-side diagnostics
    pub meta: ResponseMeta,
}

/// Error details in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Member of the closed error taxonomy
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Structured context (offending field, underlying error type, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Wall-clock handling time in milliseconds
    pub server_ms: f64,
    /// Protocol version
    pub protocol_v: u8,
}

/// A line that could not be turned into a [`Request`].
///
/// Carries whatever correlation id could be recovered so the error
/// response can still be matched by the client.
#[derive(Debug)]
pub struct RejectedRequest {
    pub id: Value,
    pub error: DaemonError,
}

fn default_version() -> u64 {
    u64::from(PROTOCOL_VERSION)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

impl Request {
    /// Create a new request with an auto-generated UUID.
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            id: Value::String(uuid::Uuid::new_v4().to_string()),
            v: u64::from(PROTOCOL_VERSION),
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters.
    pub fn simple(method: impl Into<String>) -> Self {
        Self::new(method, Params::new())
    }

    /// Parse a request from one NDJSON line (newline already stripped).
    ///
    /// Unparsable JSON, a non-object envelope, a missing `method` and an
    /// unsupported `v` all reject with `MALFORMED_REQUEST`.
    pub fn parse(line: &[u8]) -> Result<Self, RejectedRequest> {
        let value: Value = serde_json::from_slice(line).map_err(|e| RejectedRequest {
            id: Value::Null,
            error: DaemonError::malformed(format!("invalid JSON: {e}")),
        })?;

        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let request: Request = serde_json::from_value(value).map_err(|e| RejectedRequest {
            id: id.clone(),
            error: DaemonError::malformed(format!("invalid request envelope: {e}")),
        })?;

        if request.v != u64::from(PROTOCOL_VERSION) {
            return Err(RejectedRequest {
                id,
                error: DaemonError::UnsupportedVersion {
                    got: request.v,
                    supported: PROTOCOL_VERSION,
                },
            });
        }

        Ok(request)
    }

    /// Serialize the request to a compact NDJSON line.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{json}\n"))
    }
}

impl Response {
    /// Create a success response.
    pub fn success(id: impl Into<Value>, result: Value, server_ms: f64) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
            meta: ResponseMeta::new(server_ms),
        }
    }

    /// Create a failure response.
    pub fn failure(id: impl Into<Value>, error: ErrorInfo, server_ms: f64) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error),
            meta: ResponseMeta::new(server_ms),
        }
    }

    /// Create a failure response from an internal error.
    pub fn from_error(id: impl Into<Value>, error: &DaemonError, server_ms: f64) -> Self {
        Self::failure(id, error.to_error_info(), server_ms)
    }

    /// Parse a response from one NDJSON line.
    pub fn from_ndjson_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }

    /// Serialize the response to a compact NDJSON line.
    ///
    /// `Value` always serializes, so this cannot fail in practice; the
    /// fallback keeps the envelope intact if it ever does.
    pub fn to_ndjson_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let fallback = Response::from_error(
                    self.id.clone(),
                    &DaemonError::internal("serialize", e.to_string()),
                    self.meta.server_ms,
                );
                format!(
                    "{}\n",
                    serde_json::to_string(&fallback).unwrap_or_else(|_| String::from("{}"))
                )
            }
        }
    }
}

impl ResponseMeta {
    fn new(server_ms: f64) -> Self {
        Self {
            server_ms: server_ms.max(0.0),
            protocol_v: PROTOCOL_VERSION,
        }
    }
}

/// Convert a handler result into JSON.
///
/// Values `serde_json` cannot represent (maps with non-string keys, failing
/// `Serialize` impls) fall back to their `Debug` string so a response can
/// always be encoded.
pub fn to_wire_value<T: Serialize + Debug>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_request_serialization() {
        let req = Request::simple("health");
        let line = req.to_ndjson_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("\"method\":\"health\""));
    }

    #[test]
    fn test_parse_defaults_version_and_params() {
        let req = Request::parse(br#"{"id":"a","method":"recent"}"#).unwrap();
        assert_eq!(req.v, 1);
        assert!(req.params.is_empty());

        let req = Request::parse(br#"{"id":"b","v":1,"method":"recent","params":null}"#).unwrap();
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        let rejected = Request::parse(b"{not json").unwrap_err();
        assert!(rejected.id.is_null());
        assert_eq!(rejected.error.code(), ErrorCode::MalformedRequest);
    }

    #[test]
    fn test_parse_keeps_id_on_envelope_error() {
        let rejected = Request::parse(br#"{"id":"x1","v":1,"params":{}}"#).unwrap_err();
        assert_eq!(rejected.id, "x1");
        assert_eq!(rejected.error.code(), ErrorCode::MalformedRequest);
    }

    #[test]
    fn test_parse_keeps_non_string_ids() {
        let req = Request::parse(br#"{"id":42,"v":1,"method":"health"}"#).unwrap();
        assert_eq!(req.id, json!(42));

        let req = Request::parse(br#"{"v":1,"method":"health"}"#).unwrap();
        assert!(req.id.is_null());

        let rejected = Request::parse(br#"{"id":7,"v":1}"#).unwrap_err();
        assert_eq!(rejected.id, json!(7));
    }

    #[test]
    fn test_parse_rejects_unsupported_version() {
        let rejected = Request::parse(br#"{"id":"v9","v":9,"method":"health"}"#).unwrap_err();
        assert_eq!(rejected.id, "v9");
        assert_eq!(rejected.error.code(), ErrorCode::MalformedRequest);
        assert_eq!(rejected.error.details().unwrap()["field"], "v");
    }

    #[test]
    fn test_response_success_has_no_error_key() {
        let resp = Response::success("123", json!({"status": "ok"}), 12.5);
        let line = resp.to_ndjson_line();
        assert!(resp.ok);
        assert!(!line.contains("\"error\""));
        assert_eq!(resp.meta.protocol_v, PROTOCOL_VERSION);
    }

    #[test]
    fn test_response_failure_has_no_result_key() {
        let resp = Response::from_error("123", &DaemonError::UnknownMethod("nope".into()), 5.0);
        let line = resp.to_ndjson_line();
        assert!(!resp.ok);
        assert!(!line.contains("\"result\""));
        assert_eq!(resp.error.unwrap().code, ErrorCode::UnknownMethod);
    }

    #[test]
    fn test_to_wire_value_coerces_unrepresentable() {
        let mut odd: HashMap<(u8, u8), u8> = HashMap::new();
        odd.insert((1, 2), 3);
        assert!(to_wire_value(&odd).is_string());
        assert_eq!(to_wire_value(&vec![1, 2]), json!([1, 2]));
    }
}
