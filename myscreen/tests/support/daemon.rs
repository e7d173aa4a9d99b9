use std::{
    fs,
    net::{TcpListener, TcpStream},
    path::PathBuf,
    process,
    process::{Command, Stdio},
    thread, time,
};

use anyhow::Context;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tempfile::TempDir;

use super::attach;

/// Proc is a helper handle for a `myscreend` subprocess.
/// It shuts the daemon down when it goes out of scope.
pub struct Proc {
    pub proc: process::Child,
    pub port: u16,
    pub tmp_dir: TempDir,
    config_file: PathBuf,
}

impl Proc {
    pub fn new() -> anyhow::Result<Proc> {
        let tmp_dir =
            tempfile::Builder::new().prefix("myscreen-test").tempdir().context("creating tmp dir")?;

        // an ephemeral port so parallel test binaries don't collide
        let port = free_port()?;
        let config_file = tmp_dir.path().join("config.toml");
        fs::write(&config_file, format!("port = {}\nshutdown_grace_ms = 50\n", port))
            .context("writing config file")?;

        let log_file = tmp_dir.path().join("daemon.log");
        eprintln!("spawning daemon proc with log {:?}", &log_file);

        let proc = Command::new(super::myscreend_bin())
            .arg("-vv")
            .arg("--log-file")
            .arg(&log_file)
            .arg("--config-file")
            .arg(&config_file)
            .current_dir(tmp_dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("spawning daemon process")?;

        // spin until we can dial the port successfully
        super::wait_until(|| Ok(TcpStream::connect(("127.0.0.1", port)).is_ok()))?;

        Ok(Proc { proc, port, tmp_dir, config_file })
    }

    /// A client invocation pre-pointed at this daemon.
    pub fn myscreen_cmd(&self) -> Command {
        let mut cmd = Command::new(super::myscreen_bin());
        cmd.arg("--config-file").arg(&self.config_file).current_dir(self.tmp_dir.path());
        cmd
    }

    /// Run a one-shot client subcommand to completion and collect its
    /// output.
    pub fn run_client(&self, args: &[&str]) -> anyhow::Result<process::Output> {
        let mut cmd = self.myscreen_cmd();
        cmd.args(args);
        cmd.output().context("running client subcommand")
    }

    pub fn list(&self) -> anyhow::Result<process::Output> {
        self.run_client(&["list"])
    }

    pub fn new_session(&self, id: &str) -> anyhow::Result<attach::Proc> {
        let mut cmd = self.myscreen_cmd();
        cmd.arg("new").arg(id);
        attach::Proc::spawn(cmd)
    }

    pub fn new_unnamed_session(&self) -> anyhow::Result<attach::Proc> {
        let mut cmd = self.myscreen_cmd();
        cmd.arg("new");
        attach::Proc::spawn(cmd)
    }

    pub fn attach(&self, id: &str) -> anyhow::Result<attach::Proc> {
        let mut cmd = self.myscreen_cmd();
        cmd.arg("attach").arg(id);
        attach::Proc::spawn(cmd)
    }

    /// Block until the daemon's session listing mentions the given id.
    pub fn wait_for_session(&self, id: &str) -> anyhow::Result<()> {
        super::wait_until(|| {
            let out = self.list()?;
            Ok(String::from_utf8_lossy(&out.stdout[..]).contains(id))
        })
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        // ask for a graceful drain first so leftover shells get swept up
        let _ = signal::kill(Pid::from_raw(self.proc.id() as i32), Signal::SIGINT);
        for _ in 0..20 {
            if let Ok(Some(_)) = self.proc.try_wait() {
                return;
            }
            thread::sleep(time::Duration::from_millis(50));
        }
        let _ = self.proc.kill();
        let _ = self.proc.wait();
    }
}

/// A port nothing is listening on right now.
pub fn free_port() -> anyhow::Result<u16> {
    let probe = TcpListener::bind("127.0.0.1:0").context("probing for a free port")?;
    Ok(probe.local_addr().context("resolving probe addr")?.port())
}
