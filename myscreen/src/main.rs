//! The myscreen client: create, attach to, kill or list the shell
//! sessions held by a running myscreend daemon.
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = libmyscreen::Args::parse();
    libmyscreen::run(args)
}
