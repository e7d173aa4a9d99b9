use std::{
    io::{Read, Write},
    os::unix::process::CommandExt as _,
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, Sender};
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use tracing::{error, info, trace, warn};

use super::notify::Event;
use crate::consts;

/// The rolling tail of a shell's merged stdout and stderr.
///
/// `start_pos` is the absolute offset of `buf[0]` in the shell's total
/// output history, so `start_pos + buf.len()` always equals the number
/// of bytes the shell has ever written.
#[derive(Debug)]
pub struct OutputBuffer {
    max_bytes: usize,
    buf: Vec<u8>,
    start_pos: u64,
}

impl OutputBuffer {
    fn new(max_bytes: usize) -> OutputBuffer {
        OutputBuffer { max_bytes, buf: Vec::new(), start_pos: 0 }
    }

    fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.max_bytes {
            let excess = self.buf.len() - self.max_bytes;
            self.buf.drain(..excess);
            self.start_pos += excess as u64;
        }
    }

    fn snapshot(&self) -> (u64, Vec<u8>) {
        (self.start_pos, self.buf.clone())
    }
}

/// One live shell session: the child process, its input queue and the
/// rolling buffer of everything it has printed.
///
/// Three background threads service the session: a pump draining the
/// input queue into the shell's stdin, and one reader per output pipe
/// appending to the buffer. A fourth thread reaps the child once both
/// output pipes hit EOF and reports the exit on the event queue.
#[derive(Debug)]
pub struct Session {
    id: String,
    pid: i32,
    child: Mutex<Child>,
    output: Mutex<OutputBuffer>,
    input: Mutex<Option<Sender<Vec<u8>>>>,
    input_closed: AtomicBool,
}

impl Session {
    /// Start `<shell> -i` in its own process group (so signals aimed
    /// at the daemon never reach it) and spawn the service threads.
    pub fn spawn(
        id: &str,
        shell: &str,
        buf_bytes: usize,
        notify_tx: Sender<Event>,
    ) -> anyhow::Result<Arc<Session>> {
        let mut cmd = Command::new(shell);
        cmd.arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = cmd.spawn().context("spawning shell")?;

        let pid = child.id() as i32;
        let shell_stdin = child.stdin.take().context("taking shell stdin")?;
        let shell_stdout = child.stdout.take().context("taking shell stdout")?;
        let shell_stderr = child.stderr.take().context("taking shell stderr")?;

        let (input_tx, input_rx) = bounded(consts::INPUT_QUEUE_DEPTH);
        let session = Arc::new(Session {
            id: String::from(id),
            pid,
            child: Mutex::new(child),
            output: Mutex::new(OutputBuffer::new(buf_bytes)),
            input: Mutex::new(Some(input_tx)),
            input_closed: AtomicBool::new(false),
        });

        let input_session = Arc::clone(&session);
        thread::spawn(move || input_session.pump_input(input_rx, shell_stdin));

        let stdout_session = Arc::clone(&session);
        let stdout_tx = notify_tx.clone();
        let stdout_pump = thread::spawn(move || stdout_session.pump_output(shell_stdout, stdout_tx));

        let stderr_session = Arc::clone(&session);
        let stderr_tx = notify_tx.clone();
        let stderr_pump = thread::spawn(move || stderr_session.pump_output(shell_stderr, stderr_tx));

        let reap_session = Arc::clone(&session);
        thread::spawn(move || reap_session.reap(vec![stdout_pump, stderr_pump], notify_tx));

        info!("s({}): started shell with pid {}", id, pid);
        Ok(session)
    }

    /// Queue a chunk for the shell's stdin. Blocks when the queue is
    /// full, which is the backpressure from a wedged shell to a chatty
    /// client. A no-op once the input has been closed.
    pub fn feed(&self, bytes: Vec<u8>) {
        if self.input_closed.load(Ordering::Acquire) {
            return;
        }
        // clone the sender out so the send happens without the lock held
        let tx = self.input.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(bytes);
        }
    }

    /// Close the input queue. Idempotent; the pump drains what is
    /// already queued, then closes the shell's stdin.
    pub fn close_input(&self) {
        if self.input_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("s({}): input closed", self.id);
        self.input.lock().unwrap().take();
    }

    /// SIGKILL the shell's process group and close its input.
    /// Idempotent; killing an already dead group is not an error.
    pub fn kill(&self) {
        if let Err(err) = killpg(Pid::from_raw(self.pid), Signal::SIGKILL) {
            trace!("s({}): killpg: {}", self.id, err);
        }
        self.close_input();
    }

    /// The buffer's absolute start offset and a copy of its contents.
    pub fn snapshot(&self) -> (u64, Vec<u8>) {
        self.output.lock().unwrap().snapshot()
    }

    fn pump_input(&self, input_rx: Receiver<Vec<u8>>, mut shell_stdin: ChildStdin) {
        for chunk in input_rx.iter() {
            if let Err(err) = shell_stdin.write_all(&chunk) {
                // a dead stdin does not kill the session, the shell may
                // still be producing output worth delivering
                warn!("s({}): writing to shell stdin: {}", self.id, err);
                self.close_input();
                break;
            }
        }
        trace!("s({}): input pump exiting", self.id);
        // dropping shell_stdin closes the pipe
    }

    fn pump_output<R: Read>(&self, mut pipe: R, notify_tx: Sender<Event>) {
        let mut buf = [0u8; consts::READ_CHUNK_BYTES];
        loop {
            let nread = match pipe.read(&mut buf) {
                Ok(0) => break, // EOF
                Ok(n) => n,
                Err(err) => {
                    warn!("s({}): reading from shell pipe: {}", self.id, err);
                    break;
                }
            };
            self.output.lock().unwrap().append(&buf[..nread]);
            if notify_tx.send(Event::Output(self.id.clone())).is_err() {
                break;
            }
        }
        trace!("s({}): output pump exiting", self.id);
    }

    fn reap(&self, pumps: Vec<thread::JoinHandle<()>>, notify_tx: Sender<Event>) {
        for pump in pumps {
            let _ = pump.join();
        }
        match self.child.lock().unwrap().wait() {
            Ok(status) => info!("s({}): reaped shell: {}", self.id, status),
            Err(err) => error!("s({}): waiting on shell: {}", self.id, err),
        }
        let _ = notify_tx.send(Event::Exited(self.id.clone()));
    }
}
