use std::{fs, io, sync::Mutex};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

mod attach;
pub mod config;
mod consts;
pub mod daemon;
mod kill;
mod list;
mod new;
pub mod protocol;

/// The command line arguments that the myscreen client expects.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Args {
    #[clap(short, long, action, help = "The file to write logs to, logging is off if unset")]
    pub log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(short, long, action, help = "A toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// The subcommands that the myscreen client supports.
#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Lists all the running shell sessions")]
    List,

    #[clap(about = "Creates a new shell session and attaches to it")]
    New {
        #[clap(help = "The id of the session to create, generated if omitted")]
        id: Option<String>,
    },

    #[clap(about = "Attaches to an existing shell session")]
    Attach {
        #[clap(help = "The id of the session to attach to")]
        id: String,
    },

    #[clap(about = "Kills the given shell session")]
    Kill {
        #[clap(help = "The id of the session to kill")]
        id: String,
    },
}

/// The command line arguments that the myscreen daemon expects.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct DaemonArgs {
    #[clap(
        short,
        long,
        action,
        help = "Run in the background, writing myscreend.pid and myscreend.log"
    )]
    pub daemonize: bool,

    #[clap(short, long, action, help = "The file to write logs to, stderr by default")]
    pub log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(short, long, action, help = "A toml file containing configuration")]
    pub config_file: Option<String>,
}

/// Run the myscreen client with the given arguments.
pub fn run(args: Args) -> anyhow::Result<()> {
    init_logging(args.log_file.as_deref(), args.verbose, false)?;

    let config = config::Config::load(args.config_file.as_deref())?;
    let port = config.port();

    let res = match args.command {
        Commands::List => list::run(port),
        Commands::New { id } => new::run(id, port),
        Commands::Attach { id } => attach::run(id, port),
        Commands::Kill { id } => kill::run(id, port),
    };

    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }

    Ok(())
}

/// Run the myscreen daemon with the given arguments.
pub fn run_daemon(args: DaemonArgs) -> anyhow::Result<()> {
    init_logging(args.log_file.as_deref(), args.verbose, true)?;
    daemon::run(args.config_file, args.daemonize)
}

fn init_logging(log_file: Option<&str>, verbose: u8, stderr_by_default: bool) -> anyhow::Result<()> {
    let trace_level = if verbose == 0 {
        tracing::Level::INFO
    } else if verbose == 1 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    };

    if let Some(log_file) = log_file {
        let file = fs::File::create(log_file).context("creating log file")?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else if stderr_by_default {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    Ok(())
}
