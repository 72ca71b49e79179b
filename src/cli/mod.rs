//! Command-line surfaces: the thin client (`warmctl`) and the daemon
//! start/stop/status commands embedded by daemon binaries.

pub mod client;
pub mod daemon;

pub use client::{ClientCli, ClientCommand};
pub use daemon::{DaemonCli, DaemonCommand};
