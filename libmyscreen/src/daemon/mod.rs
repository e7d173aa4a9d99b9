use std::{env, fs, net::TcpListener, process};

use anyhow::Context;
use tracing::info;

use crate::{config, consts};

pub mod notify;
pub mod registry;
mod server;
pub mod session;
mod signals;

pub use server::Server;

pub fn run(config_file: Option<String>, daemonize: bool) -> anyhow::Result<()> {
    let config = config::Config::load(config_file.as_deref())?;

    if daemonize && env::var(consts::AUTODAEMONIZE_VAR).is_err() {
        // re-exec ourselves in the background with the sentinel set;
        // the re-exec'd process takes the branch below instead
        return respawn_in_background();
    }
    if let Ok(flag) = env::var(consts::AUTODAEMONIZE_VAR) {
        if flag == "true" {
            env::remove_var(consts::AUTODAEMONIZE_VAR); // avoid looping

            let cwd = env::current_dir().context("resolving working directory")?;
            let log = fs::File::create(cwd.join(consts::LOG_FILE))
                .context("creating daemon log file")?;
            info!("daemonizing with pid_file={:?}", consts::PID_FILE);
            daemonize::Daemonize::new()
                .pid_file(cwd.join(consts::PID_FILE))
                .working_directory(&cwd)
                .stdout(log.try_clone().context("cloning log handle")?)
                .stderr(log)
                .start()
                .context("daemonizing")?;
        }
    }

    info!("\n\n======================== STARTING DAEMON ============================\n\n");

    let server = server::Server::new(config.clone());
    signals::Handler::new(server.shutdown_flag()).register()?;

    let listener = TcpListener::bind(("127.0.0.1", config.port()))
        .with_context(|| format!("binding to port {}", config.port()))?;
    server::Server::serve(server, listener)?;

    info!("daemon exiting");
    Ok(())
}

/// Launch a copy of the current binary with the autodaemonize sentinel
/// set, then return so the foreground process can exit.
fn respawn_in_background() -> anyhow::Result<()> {
    let exe = env::current_exe().context("resolving current executable")?;
    let args: Vec<String> =
        env::args().skip(1).filter(|a| a != "-d" && a != "--daemonize").collect();
    process::Command::new(exe)
        .args(args)
        .env(consts::AUTODAEMONIZE_VAR, "true")
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .spawn()
        .context("launching background daemon")?;
    info!("launched background daemon");
    Ok(())
}
