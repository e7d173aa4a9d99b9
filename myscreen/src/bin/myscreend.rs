//! The myscreen daemon: holds the pool of detachable shell sessions
//! and serves clients over a local TCP socket.
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = libmyscreen::DaemonArgs::parse();
    libmyscreen::run_daemon(args)
}
