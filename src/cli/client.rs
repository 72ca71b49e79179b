//! `warmctl`: one request per invocation, JSON on stdout.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{self, Client, RenderOptions};
use crate::error::DaemonError;
use crate::protocol::{Params, Request};
use crate::shaping::OutputControl;

/// Thin client for warm daemons
#[derive(Parser, Debug)]
#[command(name = "warmctl")]
#[command(about = "Send one request to a warm daemon and print the JSON result")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct ClientCli {
    /// Service whose standard socket to use
    #[arg(long, global = true, env = "WARM_SERVICE", default_value = "imessage")]
    pub service: String,

    /// Explicit socket path (overrides --service)
    #[arg(long, global = true, env = "WARM_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Socket timeout in seconds (greater than 0)
    #[arg(long, global = true, default_value = "2", value_parser = parse_timeout)]
    pub timeout: Duration,

    /// Print the whole response envelope
    #[arg(long, global = true)]
    pub raw_response: bool,

    /// Pretty-print JSON (ignored with --minimal)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Ask the daemon for a reduced field set
    #[arg(long, global = true)]
    pub compact: bool,

    /// Ask the daemon for the smallest output
    #[arg(long, global = true)]
    pub minimal: bool,

    /// Comma-separated field allowlist
    #[arg(long, global = true, value_delimiter = ',')]
    pub fields: Option<Vec<String>>,

    /// Truncate long text fields to this many characters
    #[arg(long, global = true)]
    pub max_text_chars: Option<usize>,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClientCommand {
    /// Daemon health
    Health,

    /// Number of unread messages
    UnreadCount,

    /// Unread messages
    Unread {
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Recent messages
    Recent {
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Keyword search
    TextSearch {
        query: String,
        #[arg(long)]
        limit: Option<u64>,
        /// ISO date or date-time lower bound
        #[arg(long)]
        since: Option<String>,
    },

    /// Messages exchanged with one phone number
    MessagesByPhone {
        phone: String,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Several views in one round trip
    Bundle {
        /// Comma-separated sections to run
        #[arg(long, value_delimiter = ',')]
        include: Option<Vec<String>>,
        #[arg(long)]
        unread_limit: Option<u64>,
        #[arg(long)]
        recent_limit: Option<u64>,
        #[arg(long)]
        search_limit: Option<u64>,
        #[arg(long)]
        messages_limit: Option<u64>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Contact name to resolve to a phone number
        #[arg(long)]
        contact: Option<String>,
    },

    /// List registered methods
    Methods,

    /// Stop the daemon
    Stop,

    /// Call any registered method
    Call {
        method: String,
        /// Params as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
}

/// Parse `--timeout` seconds. Zero, negative and non-finite values are rejected.
fn parse_timeout(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("invalid number: {e}"))?;
    if secs.is_nan() || secs <= 0.0 {
        return Err(format!("timeout must be greater than 0, got {raw}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

impl ClientCli {
    /// Socket path from `--socket`, else the service's standard path.
    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| crate::lifecycle::service_socket_path(&self.service))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn client(&self) -> Client {
        Client::new(self.socket_path()).with_timeout(self.timeout())
    }

    pub fn output_control(&self) -> OutputControl {
        OutputControl {
            fields: self.fields.clone(),
            max_text_chars: self.max_text_chars,
            compact: self.compact,
            minimal: self.minimal,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            raw_response: self.raw_response,
            pretty: self.pretty,
            minimal: self.minimal,
        }
    }

    /// Build the request for the chosen subcommand.
    pub fn request(&self) -> Result<Request, DaemonError> {
        let (method, mut params) = match &self.command {
            ClientCommand::Health => ("health".to_string(), Params::new()),
            ClientCommand::UnreadCount => ("unread_count".to_string(), Params::new()),
            ClientCommand::Unread { limit } => {
                ("unread_messages".to_string(), object(json!({ "limit": limit })))
            }
            ClientCommand::Recent { limit } => ("recent".to_string(), object(json!({ "limit": limit }))),
            ClientCommand::TextSearch {
                query,
                limit,
                since,
            } => (
                "text_search".to_string(),
                object(json!({ "query": query, "limit": limit, "since": since })),
            ),
            ClientCommand::MessagesByPhone { phone, limit } => (
                "messages_by_phone".to_string(),
                object(json!({ "phone": phone, "limit": limit })),
            ),
            ClientCommand::Bundle {
                include,
                unread_limit,
                recent_limit,
                search_limit,
                messages_limit,
                query,
                phone,
                contact,
            } => (
                "bundle".to_string(),
                object(json!({
                    "include": include,
                    "unread_limit": unread_limit,
                    "recent_limit": recent_limit,
                    "search_limit": search_limit,
                    "messages_limit": messages_limit,
                    "query": query,
                    "phone": phone,
                    "contact": contact,
                })),
            ),
            ClientCommand::Methods => ("methods".to_string(), Params::new()),
            ClientCommand::Stop => ("stop".to_string(), Params::new()),
            ClientCommand::Call { method, params } => {
                let params = match params.as_deref() {
                    None => Params::new(),
                    Some(raw) => match serde_json::from_str::<Value>(raw) {
                        Ok(Value::Object(map)) => map,
                        Ok(Value::Null) => Params::new(),
                        Ok(_) => {
                            return Err(DaemonError::validation("params", "--params must be a JSON object"))
                        }
                        Err(e) => {
                            return Err(DaemonError::validation("params", format!("--params is not valid JSON: {e}")))
                        }
                    },
                };
                (method.clone(), params)
            }
        };

        params.retain(|_, value| !value.is_null());
        self.output_control().write_params(&mut params);
        Ok(Request::new(method, params))
    }

    /// Run the command, print the outcome, and return the exit code.
    pub fn run(&self) -> i32 {
        let outcome = self.request().and_then(|request| self.client().send(&request));
        println!("{}", client::render(&outcome, self.render_options()));
        client::exit_code(&outcome)
    }
}

fn object(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}
