//! `start`, `stop` and `status` for daemon binaries.
//!
//! A daemon binary parses [`DaemonCli`] and hands [`DaemonCli::run`] a
//! factory building its service and method table. The factory runs after
//! daemonizing, so warm resources are opened in the long-lived process.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{expand_path, ServerConfig, DEFAULT_CLIENT_TIMEOUT};
use crate::error::DaemonError;
use crate::lifecycle::{self, SocketState};
use crate::logging;
use crate::registry::MethodTable;
use crate::server::DaemonServer;
use crate::service::Service;

/// Daemon process control
#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct DaemonCli {
    /// Socket path (defaults to the service's standard path)
    #[arg(long, global = true, env = "WARM_SOCKET")]
    pub socket: Option<PathBuf>,

    /// PID file path (defaults to the service's standard path)
    #[arg(long, global = true)]
    pub pidfile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Stay attached to the terminal and log to stderr
        #[arg(long)]
        foreground: bool,
    },
    /// Stop a running daemon
    Stop,
    /// Report whether the daemon is running (exit 0 if so, 1 if not)
    Status,
}

impl DaemonCli {
    pub fn socket_path(&self, service_name: &str) -> PathBuf {
        match &self.socket {
            Some(path) => expand_path(path),
            None => lifecycle::service_socket_path(service_name),
        }
    }

    pub fn pid_path(&self, service_name: &str) -> PathBuf {
        match &self.pidfile {
            Some(path) => expand_path(path),
            None => lifecycle::service_pid_path(service_name),
        }
    }

    pub fn server_config(&self, service_name: &str) -> ServerConfig {
        ServerConfig::new(self.socket_path(service_name)).with_pid_path(self.pid_path(service_name))
    }

    /// Execute the subcommand and return the process exit code.
    pub fn run<S, F>(&self, service_name: &str, build: F) -> Result<i32>
    where
        S: Service,
        F: FnOnce() -> Result<(Arc<S>, MethodTable<S>)>,
    {
        let socket_path = self.socket_path(service_name);
        let pid_path = self.pid_path(service_name);

        match &self.command {
            DaemonCommand::Start { foreground } => {
                if lifecycle::probe_socket(&socket_path) == SocketState::Live {
                    let error = DaemonError::AlreadyRunning {
                        path: socket_path.clone(),
                    };
                    println!("{}", json!({"ok": false, "error": error.to_error_info()}));
                    return Ok(1);
                }

                if *foreground {
                    logging::init_stderr_logging("info")?;
                } else {
                    lifecycle::daemonize(None)?;
                    #[cfg(feature = "log-rotation")]
                    logging::init_logging_with_rotation(service_name)?;
                    #[cfg(not(feature = "log-rotation"))]
                    logging::init_logging(service_name)?;
                }

                let (service, table) = build()?;
                info!(service = service_name, foreground = *foreground, "Starting daemon");
                DaemonServer::new(service, table, self.server_config(service_name)).serve()?;
                Ok(0)
            }
            DaemonCommand::Stop => {
                logging::init_stderr_logging("warn")?;
                let outcome =
                    lifecycle::stop_daemon(&socket_path, Some(&pid_path), DEFAULT_CLIENT_TIMEOUT)?;
                println!(
                    "{}",
                    json!({"ok": true, "result": {"stopped": format!("{outcome:?}").to_lowercase()}})
                );
                Ok(0)
            }
            DaemonCommand::Status => {
                let running = lifecycle::probe_socket(&socket_path) == SocketState::Live;
                println!(
                    "{}",
                    json!({
                        "running": running,
                        "socket": socket_path.display().to_string(),
                        "pid": lifecycle::read_pid_file(&pid_path),
                    })
                );
                Ok(if running { 0 } else { 1 })
            }
        }
    }
}
