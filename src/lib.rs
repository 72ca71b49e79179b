//! # warm-daemon
//!
//! Warm local daemons for integrations. A daemon keeps a service's
//! expensive resources (database handles, API sessions, caches) open and
//! answers short-lived clients over a UNIX socket, so each call pays for a
//! socket round trip instead of a process start.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use serde_json::json;
//! use std::sync::Arc;
//! use warm_daemon::{DaemonServer, MethodInfo, MethodTable, ParamType, ServerConfig, Service, ShapeProfile};
//!
//! struct Notes;
//!
//! impl Service for Notes {
//!     fn name(&self) -> &str { "notes" }
//!     fn version(&self) -> &str { "1.0.0" }
//! }
//!
//! #[derive(Deserialize)]
//! struct Find { query: String }
//!
//! fn main() -> anyhow::Result<()> {
//!     let table = MethodTable::<Notes>::new().with(
//!         MethodInfo::new("notes.find", "Find notes").required("query", ParamType::String),
//!         ShapeProfile::keys(&["notes"]),
//!         |_ctx, p: Find| Ok(json!({"notes": [{"text": p.query}]})),
//!     );
//!     DaemonServer::new(Arc::new(Notes), table, ServerConfig::for_service("notes")).serve()
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! NDJSON over a UNIX socket, one request and one response per connection:
//!
//! **Request:**
//! ```json
//! {"id":"uuid","v":1,"method":"text_search","params":{"query":"dinner"}}
//! ```
//!
//! **Response:**
//! ```json
//! {"id":"uuid","ok":true,"result":{"results":[]},"meta":{"server_ms":0.8,"protocol_v":1}}
//! ```
//!
//! Failures carry `{"code", "message", "details"}` with a code from
//! [`ErrorCode`].

pub mod bundle;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod inbox;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod service;
pub mod shaping;

#[cfg(feature = "async-client")]
pub mod async_client;

pub use bundle::{BundleManifest, Section};
pub use client::{exit_code, Client, EXIT_DAEMON_ERROR, EXIT_OK, EXIT_TRANSPORT_ERROR};
pub use config::{ClientConfig, ServerConfig};
pub use error::{DaemonError, ErrorCode};
pub use inbox::{inbox_manifest, inbox_table, Contact, InboxService};
pub use lifecycle::{
    daemonize, is_service_running, probe_socket, service_pid_path, service_socket_path,
    stop_service, write_pid_file, SocketState,
};
pub use protocol::{ErrorInfo, Params, Request, Response, ResponseMeta};
pub use registry::{CallContext, Dispatcher, MethodTable};
pub use server::{DaemonServer, ServerHandle};
pub use service::{MethodInfo, ParamInfo, ParamType, Service};
pub use shaping::{OutputControl, ShapeProfile};

#[cfg(feature = "async-client")]
pub use async_client::AsyncClient;

/// Protocol version constant
pub const PROTOCOL_VERSION: u8 = 1;

/// Default base directory for per-service sockets, PID files and logs
pub const DEFAULT_SOCKET_BASE: &str = "~/.warm";
