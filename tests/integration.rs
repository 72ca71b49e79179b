//! Integration tests over real UNIX sockets.
//!
//! Each test starts a daemon on a socket inside its own temp directory,
//! backed by a spy inbox that records which data methods ran.

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use warm_daemon::client::{self, RenderOptions};
use warm_daemon::inbox::{inbox_table, Contact, InboxService};
use warm_daemon::lifecycle::{self, SocketState};
use warm_daemon::{
    Client, DaemonServer, ErrorCode, MethodInfo, ParamType, Request, Response, ServerConfig,
    ServerHandle, Service, ShapeProfile,
};

// ============================================================================
// Spy Service
// ============================================================================

struct SpyInbox {
    calls: Mutex<Vec<String>>,
    unread: u64,
}

impl SpyInbox {
    fn new(unread: u64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            unread,
        }
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn message(i: u64, text: &str) -> Value {
        json!({
            "date": format!("2024-03-0{}T10:00:00", i % 9 + 1),
            "phone": "+15550100",
            "is_from_me": i % 2 == 0,
            "text": text,
            "group_id": null,
            "days_old": i,
            "service": "iMessage",
        })
    }
}

impl Service for SpyInbox {
    fn name(&self) -> &str {
        "spy"
    }

    fn version(&self) -> &str {
        "9.9.9"
    }

    fn health(&self) -> Result<Value> {
        Ok(json!({"ok": true, "service": "spy", "db": "fixture", "answer": 42}))
    }
}

impl InboxService for SpyInbox {
    fn unread_count(&self) -> Result<u64> {
        self.record("unread_count");
        Ok(self.unread)
    }

    fn unread_messages(&self, limit: u64) -> Result<Vec<Value>> {
        self.record("unread_messages");
        Ok((0..limit.min(2)).map(|i| Self::message(i, "unread")).collect())
    }

    fn recent(&self, limit: u64) -> Result<Vec<Value>> {
        self.record("recent");
        let long = "a fairly long message body that goes on and on well past any reasonable preview";
        Ok((0..limit.min(3)).map(|i| Self::message(i, long)).collect())
    }

    fn text_search(&self, query: &str, limit: u64, _since: Option<NaiveDateTime>) -> Result<Vec<Value>> {
        self.record("text_search");
        Ok((0..limit.min(2))
            .map(|i| {
                let mut hit = Self::message(i, &format!("we talked about {query} yesterday"));
                hit["match_snippet"] = json!(format!("...{query}..."));
                hit
            })
            .collect())
    }

    fn messages_by_phone(&self, phone: &str, limit: u64) -> Result<Vec<Value>> {
        self.record("messages_by_phone");
        Ok((0..limit.min(1))
            .map(|i| {
                let mut m = Self::message(i, "hello");
                m["phone"] = json!(phone);
                m
            })
            .collect())
    }

    fn resolve_contact(&self, name: &str) -> Result<Option<Contact>> {
        Ok((name == "Grace").then(|| Contact {
            name: "Grace Hopper".into(),
            phone: "+15550199".into(),
        }))
    }
}

#[derive(Deserialize)]
struct SlowParams {
    ms: u64,
}

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    _dir: TempDir,
    socket_path: PathBuf,
    pid_path: PathBuf,
    service: Arc<SpyInbox>,
    handle: ServerHandle,
    thread: Option<thread::JoinHandle<Result<()>>>,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with(2, |config| config)
    }

    fn start_with(unread: u64, configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("spy").join("daemon.sock");
        let pid_path = dir.path().join("spy").join("daemon.pid");
        let config = configure(ServerConfig::new(&socket_path).with_pid_path(&pid_path));

        let service = Arc::new(SpyInbox::new(unread));
        let table = inbox_table::<SpyInbox>()
            .with(
                MethodInfo::new("test.slow", "Sleep, then answer")
                    .required("ms", ParamType::Integer),
                ShapeProfile::unshaped(),
                |_ctx, p: SlowParams| {
                    thread::sleep(Duration::from_millis(p.ms));
                    Ok(json!({ "slept_ms": p.ms }))
                },
            )
            .with(
                MethodInfo::new("test.panic", "Always panics"),
                ShapeProfile::unshaped(),
                |_ctx, _: warm_daemon::Params| -> Result<Value> { panic!("boom") },
            )
            .with(
                MethodInfo::new("test.fail", "Always fails"),
                ShapeProfile::unshaped(),
                |_ctx, _: warm_daemon::Params| -> Result<Value> {
                    Err(anyhow::anyhow!("disk on fire").context("reading chat database"))
                },
            );

        let server = DaemonServer::new(Arc::clone(&service), table, config);
        let handle = server.handle();
        let thread = thread::spawn(move || server.serve());

        assert!(
            lifecycle::wait_for_socket(&socket_path, Duration::from_secs(5)),
            "daemon did not come up"
        );
        // The PID file is written once the socket permissions are set.
        let start = Instant::now();
        while !pid_path.exists() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }

        Self {
            _dir: dir,
            socket_path,
            pid_path,
            service,
            handle,
            thread: Some(thread),
        }
    }

    fn client(&self) -> Client {
        Client::new(&self.socket_path).with_timeout(Duration::from_secs(5))
    }

    fn call(&self, method: &str, params: Value) -> Response {
        self.client().call(method, params).unwrap()
    }

    fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().expect("server thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Send raw bytes and read one response line.
fn send_raw(socket_path: &Path, bytes: &[u8]) -> String {
    let mut stream = UnixStream::connect(socket_path).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(bytes).unwrap();
    stream.flush().unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

fn error_code(response: &Response) -> ErrorCode {
    response.error.as_ref().expect("expected an error").code
}

// ============================================================================
// Built-ins
// ============================================================================

#[test]
fn test_health_returns_service_payload() {
    let server = TestServer::start();
    let response = server.call("health", json!({}));

    assert!(response.ok);
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap(), server.service.health().unwrap());
    assert!(response.meta.server_ms >= 0.0);
    assert_eq!(response.meta.protocol_v, 1);
}

#[test]
fn test_response_echoes_request_id() {
    let server = TestServer::start();
    let request = Request::simple("health");
    let response = server.client().send(&request).unwrap();
    assert_eq!(response.id, request.id);
}

#[test]
fn test_methods_lists_contracts() {
    let server = TestServer::start();
    let result = server.call("methods", Value::Null).result.unwrap();
    let methods = result["methods"].as_array().unwrap();

    let search = methods
        .iter()
        .find(|m| m["name"] == "text_search")
        .expect("text_search listed");
    assert_eq!(search["schema"]["required"], json!(["query"]));
    assert_eq!(search["schema"]["properties"]["limit"]["default"], 20);

    for name in ["health", "methods", "stop", "bundle", "test.slow"] {
        assert!(methods.iter().any(|m| m["name"] == name), "missing {name}");
    }
}

#[test]
fn test_stop_shuts_down_and_cleans_up() {
    let mut server = TestServer::start();
    assert!(server.pid_path.exists());

    let response = server.call("stop", Value::Null);
    assert!(response.ok);
    server.join().unwrap();

    assert!(!server.socket_path.exists());
    assert!(!server.pid_path.exists());
}

#[test]
fn test_socket_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let server = TestServer::start();
    let mode = std::fs::metadata(&server.socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ============================================================================
// Dispatch and Validation
// ============================================================================

#[test]
fn test_unknown_method_never_reaches_service() {
    let server = TestServer::start();
    let response = server.call("no.such.method", json!({"limit": 1}));

    assert!(!response.ok);
    assert!(response.result.is_none());
    assert_eq!(error_code(&response), ErrorCode::UnknownMethod);
    assert!(server.service.calls().is_empty());
}

#[test]
fn test_search_without_query_is_rejected() {
    let server = TestServer::start();
    let response = server.call("text_search", json!({"limit": 5}));

    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert!(error.message.contains("query is required"));
    assert!(!server.service.calls().contains(&"text_search".to_string()));
}

#[test]
fn test_wrong_param_type_is_rejected() {
    let server = TestServer::start();
    let response = server.call("recent", json!({"limit": "ten"}));

    assert_eq!(error_code(&response), ErrorCode::ValidationError);
    assert_eq!(response.error.unwrap().details.unwrap()["field"], "limit");
    assert!(server.service.calls().is_empty());
}

#[test]
fn test_handler_error_is_internal_with_chain() {
    let server = TestServer::start();
    let response = server.call("test.fail", Value::Null);

    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::InternalError);
    assert_eq!(error.message, "reading chat database");
    assert_eq!(error.details.unwrap()["chain"][0], "disk on fire");
}

#[test]
fn test_handler_panic_is_internal_error_and_daemon_survives() {
    let server = TestServer::start();
    let response = server.call("test.panic", Value::Null);

    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::InternalError);
    assert_eq!(error.details.unwrap()["type"], "panic");

    assert!(server.call("health", Value::Null).ok);
}

// ============================================================================
// Output Shaping
// ============================================================================

#[test]
fn test_fields_projection() {
    let server = TestServer::start();
    let result = server
        .call("recent", json!({"fields": ["date", "text"]}))
        .result
        .unwrap();

    for message in result["messages"].as_array().unwrap() {
        for key in message.as_object().unwrap().keys() {
            assert!(key == "date" || key == "text", "unexpected key {key}");
        }
    }
}

#[test]
fn test_max_text_chars_bounds_length() {
    let server = TestServer::start();
    let result = server
        .call("recent", json!({"max_text_chars": 12}))
        .result
        .unwrap();

    for message in result["messages"].as_array().unwrap() {
        let text = message["text"].as_str().unwrap();
        assert!(text.chars().count() <= 12 + 3);
        assert!(text.ends_with("..."));
    }

    let result = server
        .call("unread_messages", json!({"max_text_chars": 100}))
        .result
        .unwrap();
    assert_eq!(result["messages"][0]["text"], "unread");
}

#[test]
fn test_minimal_preset() {
    let server = TestServer::start();
    let outcome = server.client().call("recent", json!({"minimal": true}));
    let text = client::render(
        &outcome,
        RenderOptions {
            pretty: true,
            minimal: true,
            ..Default::default()
        },
    );
    assert!(!text.contains('\n'));

    let result: Value = serde_json::from_str(&text).unwrap();
    let allowed = ["date", "phone", "is_from_me", "text"];
    for message in result["messages"].as_array().unwrap() {
        let keys: Vec<&String> = message.as_object().unwrap().keys().collect();
        assert!(keys.iter().all(|k| allowed.contains(&k.as_str())), "{keys:?}");
        assert!(message["text"].as_str().unwrap().chars().count() <= 120 + 3);
    }
}

#[test]
fn test_minimal_search_keeps_snippet() {
    let server = TestServer::start();
    let result = server
        .call("text_search", json!({"query": "tacos", "minimal": true}))
        .result
        .unwrap();
    let hit = &result["results"][0];
    assert_eq!(hit["match_snippet"], "...tacos...");
    assert!(hit.get("group_id").is_none());
}

#[test]
fn test_compact_uses_method_defaults() {
    let server = TestServer::start();
    let result = server
        .call("messages_by_phone", json!({"phone": "+15550100", "compact": true}))
        .result
        .unwrap();
    let keys: Vec<&String> = result["messages"][0].as_object().unwrap().keys().collect();
    assert!(keys.iter().all(|k| ["date", "is_from_me", "text", "group_id"].contains(&k.as_str())));
    assert!(!keys.iter().any(|k| k.as_str() == "phone"));
}

// ============================================================================
// Bundles
// ============================================================================

#[test]
fn test_bundle_include_runs_only_selected_sections() {
    let server = TestServer::start();
    let result = server
        .call("bundle", json!({"include": ["unread_count"]}))
        .result
        .unwrap();

    assert_eq!(result["unread"]["count"], 2);
    assert!(result["unread"].get("messages").is_none());
    assert!(result.get("recent").is_none());
    assert!(result.get("search").is_none());
    assert_eq!(server.service.calls(), vec!["unread_count".to_string()]);
}

#[test]
fn test_bundle_comma_separated_include_and_contact() {
    let server = TestServer::start();
    let result = server
        .call(
            "bundle",
            json!({"include": "contact_messages,search", "contact": "Grace", "query": "lunch"}),
        )
        .result
        .unwrap();

    assert_eq!(result["contact_messages"]["messages"][0]["phone"], "+15550199");
    assert_eq!(result["search"]["results"].as_array().unwrap().len(), 2);
    assert_eq!(result["meta"]["resolved"]["phone"], "+15550199");
}

#[test]
fn test_bundle_unknown_section_is_validation_error() {
    let server = TestServer::start();
    let response = server.call("bundle", json!({"include": ["weather"]}));
    assert_eq!(error_code(&response), ErrorCode::ValidationError);
    assert!(server.service.calls().is_empty());
}

#[test]
fn test_bundle_reports_skipped_sections() {
    let server = TestServer::start();
    let result = server
        .call("bundle", json!({"include": ["search", "recent"]}))
        .result
        .unwrap();

    assert!(result["recent"].is_array());
    assert!(result.get("search").is_none());
    assert_eq!(result["meta"]["skipped"][0]["section"], "search");
    assert_eq!(result["meta"]["skipped"][0]["reason"], "requires query");
}

// ============================================================================
// Transport
// ============================================================================

#[test]
fn test_oversize_request_is_rejected_and_daemon_keeps_serving() {
    let server = TestServer::start_with(2, |config| config.with_max_request_bytes(256));

    let mut payload = vec![b'x'; 400];
    payload.push(b'\n');
    let line = send_raw(&server.socket_path, &payload);
    let response = Response::from_ndjson_line(&line).unwrap();

    assert!(!response.ok);
    assert_eq!(error_code(&response), ErrorCode::PayloadTooLarge);

    assert!(server.call("health", Value::Null).ok);
}

#[test]
fn test_client_reports_payload_too_large_instead_of_broken_pipe() {
    let server = TestServer::start_with(2, |config| config.with_max_request_bytes(1024));
    let client = server.client().with_timeout(Duration::from_secs(5));

    for pad in [2_000, 300_000, 3_000_000] {
        let outcome = client.call("text_search", json!({"query": "x".repeat(pad)}));
        let response = outcome.as_ref().unwrap();

        assert!(!response.ok, "pad {pad}");
        assert_eq!(error_code(response), ErrorCode::PayloadTooLarge, "pad {pad}");
        assert_eq!(client::exit_code(&outcome), client::EXIT_DAEMON_ERROR);
    }

    assert!(server.call("health", Value::Null).ok);
    assert!(server.service.calls().is_empty());
}

#[test]
fn test_malformed_json_gets_structured_error() {
    let server = TestServer::start();
    let line = send_raw(&server.socket_path, b"{not json\n");
    let response = Response::from_ndjson_line(&line).unwrap();

    assert_eq!(error_code(&response), ErrorCode::MalformedRequest);
    assert!(line.ends_with('\n'));
    assert_eq!(line.trim_end().lines().count(), 1);
}

#[test]
fn test_slow_handler_does_not_block_health() {
    let server = TestServer::start();
    let client = server.client();

    let slow = thread::spawn(move || client.call("test.slow", json!({"ms": 800})));
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    assert!(server.call("health", Value::Null).ok);
    assert!(start.elapsed() < Duration::from_millis(500));

    let slow = slow.join().unwrap().unwrap();
    assert_eq!(slow.result.unwrap()["slept_ms"], 800);
}

#[test]
fn test_second_daemon_on_live_socket_fails() {
    let server = TestServer::start();

    let second = DaemonServer::new(
        Arc::new(SpyInbox::new(0)),
        inbox_table::<SpyInbox>(),
        ServerConfig::new(&server.socket_path),
    );
    let err = second.serve().unwrap_err();
    assert!(err.to_string().contains("already listening"));

    assert!(server.call("health", Value::Null).ok);
}

#[test]
fn test_stale_socket_is_replaced() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("stale.sock");
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert_eq!(lifecycle::probe_socket(&socket_path), SocketState::Stale);

    let server = DaemonServer::new(
        Arc::new(SpyInbox::new(0)),
        inbox_table::<SpyInbox>(),
        ServerConfig::new(&socket_path),
    );
    let handle = server.handle();
    let thread = thread::spawn(move || server.serve());
    assert!(lifecycle::wait_for_socket(&socket_path, Duration::from_secs(5)));

    assert!(Client::new(&socket_path).health().unwrap().ok);
    handle.stop();
    thread.join().unwrap().unwrap();
}

#[test]
fn test_stop_daemon_graceful() {
    let mut server = TestServer::start();
    let outcome =
        lifecycle::stop_daemon(&server.socket_path, Some(&server.pid_path), Duration::from_secs(2))
            .unwrap();
    assert_eq!(outcome, lifecycle::StopOutcome::Graceful);
    server.join().unwrap();
    assert_eq!(lifecycle::probe_socket(&server.socket_path), SocketState::Missing);
}

// ============================================================================
// Client Exit Codes
// ============================================================================

#[test]
fn test_client_exit_codes() {
    let server = TestServer::start();

    let ok = server.client().call("health", Value::Null);
    assert_eq!(client::exit_code(&ok), client::EXIT_OK);

    let failed = server.client().call("nope", Value::Null);
    assert_eq!(client::exit_code(&failed), client::EXIT_DAEMON_ERROR);
    let printed: Value = serde_json::from_str(&client::render(&failed, RenderOptions::default())).unwrap();
    assert_eq!(printed["ok"], false);
    assert_eq!(printed["error"]["code"], "UNKNOWN_METHOD");
}

#[test]
fn test_client_missing_socket_never_connects() {
    let dir = TempDir::new().unwrap();
    let outcome = Client::new(dir.path().join("absent.sock")).health();

    assert_eq!(client::exit_code(&outcome), client::EXIT_TRANSPORT_ERROR);
    assert_eq!(outcome.unwrap_err().code(), ErrorCode::DaemonNotRunning);
    assert!(!dir.path().join("absent.sock").exists());
}

#[cfg(feature = "async-client")]
#[tokio::test]
async fn test_async_client_round_trip() {
    let server = TestServer::start();
    let client = warm_daemon::AsyncClient::new(&server.socket_path);

    let response = client.call("unread_count", Value::Null).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.result.unwrap()["count"], 2);
}

#[cfg(feature = "async-client")]
#[tokio::test]
async fn test_async_client_reports_payload_too_large() {
    let server = TestServer::start_with(2, |config| config.with_max_request_bytes(1024));
    let client = warm_daemon::AsyncClient::new(&server.socket_path).with_timeout(Duration::from_secs(5));

    let response = client
        .call("text_search", json!({"query": "x".repeat(300_000)}))
        .await
        .unwrap();
    assert_eq!(error_code(&response), ErrorCode::PayloadTooLarge);
}
