use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use anyhow::{anyhow, Context};
use myscreen_protocol::{Command, Message, Status};
use tracing::{info, trace};

use crate::{consts, protocol};

pub fn run(id: String, port: u16) -> anyhow::Result<()> {
    request_and_stream(Message::with_id(Command::Attach, id), port)
}

/// Send a NEW or ATTACH request and, if the daemon says yes, run the
/// attached loop until the user interrupts or the daemon hangs up.
pub(crate) fn request_and_stream(request: Message, port: u16) -> anyhow::Result<()> {
    let mut client = protocol::Client::connect(port)?;
    let reply = client.round_trip(&request).context("sending request")?;

    if reply.status == Status::Failure {
        println!("Operation failed: {}", reply.reason());
        return Ok(());
    }

    stream_session(client.into_stream())
}

/// The attached loop: one thread forwards stdin to the daemon as DATA
/// chunks, another prints the DATA deltas the daemon sends back, and
/// this thread watches for the interrupt that turns into a DETACH.
fn stream_session(stream: TcpStream) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .context("registering SIGINT handler")?;

    let read_stream = stream.try_clone().context("cloning stream for reads")?;
    // sends come from both the stdin thread and the detach path, so
    // the write half is serialized behind a mutex
    let write_stream = Arc::new(Mutex::new(stream));

    let input_stream = Arc::clone(&write_stream);
    let input_interrupted = Arc::clone(&interrupted);
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = vec![0; consts::READ_CHUNK_BYTES];
        loop {
            if input_interrupted.load(Ordering::Acquire) {
                return;
            }
            // a read error counts as end of input, same as EOF
            let nread = stdin.read(&mut buf).unwrap_or(0);
            let msg = Message::input_chunk(&buf[..nread], nread == 0);
            let mut stream = input_stream.lock().unwrap();
            if protocol::send_message(&mut *stream, &msg).is_err() {
                return;
            }
            if nread == 0 {
                trace!("sent end-of-input sentinel");
                return;
            }
        }
    });

    let output = thread::spawn(move || -> anyhow::Result<()> {
        let mut stream = read_stream;
        let mut stdout = io::stdout().lock();
        let mut printer = DeltaPrinter::default();
        loop {
            let msg = protocol::recv_message(&mut stream)?;
            if msg.command != Command::Data {
                return Err(anyhow!("unexpected {:?} message while attached", msg.command));
            }
            let (start_pos, bytes) = msg.output_payload()?;
            if let Some(delta) = printer.take(start_pos, &bytes) {
                stdout.write_all(delta).context("writing to stdout")?;
                stdout.flush().context("flushing stdout")?;
            }
        }
    });

    loop {
        if interrupted.load(Ordering::Acquire) {
            info!("interrupted, detaching");
            let mut stream = write_stream.lock().unwrap();
            let _ = protocol::send_message(&mut *stream, &Message::success(Command::Detach));
            // close the socket before printing: the output thread owns
            // the stdout lock and only lets go once its read fails
            let _ = stream.shutdown(Shutdown::Both);
            drop(stream);
            let _ = output.join();
            println!();
            println!("[detached]");
            return Ok(());
        }
        if output.is_finished() {
            // the daemon hung up, the session is over
            trace!("output thread finished, exiting");
            let _ = output.join();
            return Ok(());
        }
        thread::sleep(consts::JOIN_POLL_DUR);
    }
}

/// Tracks how far into the session's output history we have printed,
/// so that the overlapping buffer snapshots the daemon sends come out
/// as one gap free byte stream.
#[derive(Default)]
struct DeltaPrinter {
    last_printed_pos: u64,
}

impl DeltaPrinter {
    /// Given a snapshot covering `[start_pos, start_pos + data.len())`,
    /// the slice that still needs printing, if any. A start past
    /// `last_printed_pos` means the rolling window already dropped
    /// bytes we never saw; those are silently skipped.
    fn take<'data>(&mut self, start_pos: u64, data: &'data [u8]) -> Option<&'data [u8]> {
        let end_pos = start_pos + data.len() as u64;
        if end_pos <= self.last_printed_pos {
            return None;
        }
        let from = self.last_printed_pos.saturating_sub(start_pos) as usize;
        self.last_printed_pos = end_pos;
        Some(&data[from..])
    }
}
