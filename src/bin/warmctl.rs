//! Thin client for warm daemons.
//!
//! Exit codes: 0 ok, 1 the daemon reported an error, 2 no response.

use clap::Parser;
use warm_daemon::cli::ClientCli;

fn main() {
    let cli = ClientCli::parse();
    std::process::exit(cli.run());
}
