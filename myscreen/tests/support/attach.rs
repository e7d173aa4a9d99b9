use std::{
    io::{Read, Write},
    process,
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    thread,
};

use anyhow::{anyhow, Context};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};

/// Proc is a handle for an attached `myscreen new` or `myscreen attach`
/// subprocess spawned for testing, with scripted stdin and captured
/// stdout.
pub struct Proc {
    pub proc: process::Child,
    stdout: Arc<Mutex<Vec<u8>>>,
}

impl Proc {
    pub fn spawn(mut cmd: Command) -> anyhow::Result<Proc> {
        let mut proc = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("spawning attach proc")?;

        // drain stdout into a buffer the assertions can poll
        let mut out_pipe = proc.stdout.take().ok_or(anyhow!("missing stdout"))?;
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stdout);
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match out_pipe.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().unwrap().extend_from_slice(&buf[..n]),
                }
            }
        });

        Ok(Proc { proc, stdout })
    }

    /// Type a shell command into the attached session.
    pub fn run_cmd(&mut self, cmd: &str) -> anyhow::Result<()> {
        eprintln!("running cmd '{cmd}'");
        let stdin = self.proc.stdin.as_mut().ok_or(anyhow!("missing stdin"))?;

        let full_cmd = format!("{cmd}\n");
        stdin.write_all(full_cmd.as_bytes()).context("writing cmd into attach proc")?;
        stdin.flush().context("flushing cmd")?;

        Ok(())
    }

    pub fn stdout_snapshot(&self) -> Vec<u8> {
        self.stdout.lock().unwrap().clone()
    }

    pub fn wait_stdout_contains(&self, needle: &str) -> anyhow::Result<()> {
        self.wait_stdout_contains_any(&[needle]).map(|_| ())
    }

    /// Block until one of the needles shows up on stdout, returning the
    /// index of the first one seen.
    pub fn wait_stdout_contains_any(&self, needles: &[&str]) -> anyhow::Result<usize> {
        let mut found = None;
        super::wait_until(|| {
            let out = self.stdout.lock().unwrap();
            for (i, needle) in needles.iter().enumerate() {
                let needle = needle.as_bytes();
                if out.windows(needle.len()).any(|w| w == needle) {
                    found = Some(i);
                    return Ok(true);
                }
            }
            Ok(false)
        })?;
        found.ok_or_else(|| anyhow!("no needle found"))
    }

    pub fn interrupt(&self) -> anyhow::Result<()> {
        signal::kill(Pid::from_raw(self.proc.id() as i32), Signal::SIGINT)
            .context("interrupting attach proc")
    }

    /// Interrupt the client and wait for the detach farewell and a
    /// clean exit.
    pub fn detach(&mut self) -> anyhow::Result<()> {
        // an interactive shell always greets us with a prompt, and any
        // printed output means the client is fully attached and has its
        // signal handler installed
        super::wait_until(|| Ok(!self.stdout.lock().unwrap().is_empty()))?;

        self.interrupt()?;
        self.wait_stdout_contains("[detached]")?;
        let status = self.proc.wait().context("waiting on attach proc")?;
        if !status.success() {
            return Err(anyhow!("attach proc exited with {}", status));
        }
        Ok(())
    }

    pub fn wait(&mut self) -> anyhow::Result<process::ExitStatus> {
        self.proc.wait().context("waiting on attach proc")
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if let Ok(None) = self.proc.try_wait() {
            let _ = self.proc.kill();
            let _ = self.proc.wait();
        }
    }
}
