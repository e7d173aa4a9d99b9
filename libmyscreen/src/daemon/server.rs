use std::{
    io,
    net::{Shutdown, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use anyhow::Context;
use crossbeam_channel::{bounded, select, Receiver};
use myscreen_protocol::{reasons, Command, Message, Request};
use tracing::{error, info, trace, warn};

use super::{
    notify::{self, Sink},
    registry::{AttachError, CreateError, Registry},
    session::Session,
};
use crate::{config::Config, consts, protocol};

pub struct Server {
    config: Config,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: Config) -> Arc<Self> {
        let (registry, events) = Registry::new(&config);
        notify::spawn_dispatcher(Arc::clone(&registry), events);
        Arc::new(Server { config, registry, shutdown: Arc::new(AtomicBool::new(false)) })
    }

    /// The flag that flips the accept loop into graceful shutdown.
    /// Shared with the signal handler, and with tests.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// The session table, for in-process embedders and tests.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accept connections until the shutdown flag flips, spawning a
    /// handler thread per connection, then drain: terminate all
    /// attachments, give them a grace period, and sweep up whatever
    /// sessions are left.
    pub fn serve(server: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("listening on {:?}", listener.local_addr());
        // accept with a poll deadline so the shutdown flag gets
        // checked even when no clients show up
        listener.set_nonblocking(true).context("setting listener nonblocking")?;

        while !server.shutdown.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    info!("got a new connection from {}", addr);
                    stream.set_nonblocking(false).context("clearing nonblocking on conn")?;
                    let server = Arc::clone(&server);
                    thread::spawn(move || {
                        if let Err(err) = server.handle_conn(stream) {
                            error!("handling connection: {:?}", err);
                        }
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(consts::ACCEPT_POLL_DUR);
                }
                Err(err) => {
                    error!("accepting connection: {:?}", err);
                    thread::sleep(consts::ACCEPT_POLL_DUR);
                }
            }
        }

        info!("shutting down: terminating attachments");
        server.registry.broadcast_terminate();
        thread::sleep(server.config.shutdown_grace());
        server.registry.kill_remaining();
        Ok(())
    }

    /// Drive one client connection: exactly one control request, which
    /// either gets a reply and a close, or transitions into the
    /// attached state.
    fn handle_conn(&self, mut stream: TcpStream) -> anyhow::Result<()> {
        let msg = protocol::recv_message(&mut stream).context("reading request")?;
        let command = msg.command;
        let request = match Request::try_from(msg) {
            Ok(r) => r,
            Err(err) => {
                warn!("malformed {:?} request: {:#}", command, err);
                return protocol::send_message(
                    &mut stream,
                    &Message::failure(command, reasons::NOT_IMPLEMENTED),
                );
            }
        };

        match request {
            Request::List => self.handle_list(stream),
            Request::New { id } => self.handle_new(stream, id),
            Request::Attach { id } => self.handle_attach(stream, id),
            Request::Kill { id } => self.handle_kill(stream, id),
            // only meaningful while attached
            Request::Detach | Request::Data { .. } => protocol::send_message(
                &mut stream,
                &Message::failure(command, reasons::NOT_IMPLEMENTED),
            ),
        }
    }

    fn handle_list(&self, mut stream: TcpStream) -> anyhow::Result<()> {
        let sessions = self.registry.list();
        protocol::send_message(&mut stream, &Message::list_reply(sessions))
            .context("writing list reply")
    }

    fn handle_new(&self, mut stream: TcpStream, id: Option<String>) -> anyhow::Result<()> {
        let (sink, wakeups) = Sink::pair();
        let (id, session) = match self.registry.create(id.as_deref(), sink.clone()) {
            Ok(pair) => pair,
            Err(CreateError::IdTaken) => {
                return protocol::send_message(
                    &mut stream,
                    &Message::failure(Command::New, reasons::ID_TAKEN),
                );
            }
            Err(CreateError::Spawn(err)) => {
                error!("creating session: {:?}", err);
                return protocol::send_message(
                    &mut stream,
                    &Message::failure(Command::New, format!("failed to start shell: {:#}", err)),
                );
            }
        };
        protocol::send_message(&mut stream, &Message::success(Command::New))
            .context("writing new reply")?;
        self.stream_session(stream, id, session, sink, wakeups)
    }

    fn handle_attach(&self, mut stream: TcpStream, id: String) -> anyhow::Result<()> {
        let (sink, wakeups) = Sink::pair();
        let session = match self.registry.attach(&id, sink.clone()) {
            Ok(s) => s,
            Err(AttachError::NotFound) => {
                return protocol::send_message(
                    &mut stream,
                    &Message::failure(Command::Attach, reasons::NO_SUCH_SESSION),
                );
            }
            Err(AttachError::Busy) => {
                return protocol::send_message(
                    &mut stream,
                    &Message::failure(Command::Attach, reasons::ALREADY_ATTACHED),
                );
            }
        };
        protocol::send_message(&mut stream, &Message::success(Command::Attach))
            .context("writing attach reply")?;
        // replay the buffered history right away
        self.registry.notify_output(&id);
        self.stream_session(stream, id, session, sink, wakeups)
    }

    fn handle_kill(&self, mut stream: TcpStream, id: String) -> anyhow::Result<()> {
        let reply = if self.registry.kill(&id) {
            Message::success(Command::Kill)
        } else {
            Message::failure(Command::Kill, reasons::NO_SUCH_SESSION)
        };
        protocol::send_message(&mut stream, &reply).context("writing kill reply")
    }

    /// The attached state. This thread becomes the reader, consuming
    /// DATA and DETACH messages from the client; a writer thread waits
    /// on the sink and forwards buffer snapshots. Whichever side exits
    /// first wakes the other, and the connection is closed once, after
    /// both are done.
    fn stream_session(
        &self,
        stream: TcpStream,
        id: String,
        session: Arc<Session>,
        sink: Sink,
        wakeups: Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!("s({}): attached", id);

        let (detach_tx, detach_rx) = bounded(1);
        let writer_stream = stream.try_clone().context("cloning stream for writer")?;
        let writer_session = Arc::clone(&session);
        let writer_id = id.clone();
        let writer = thread::spawn(move || {
            writer_loop(writer_stream, writer_id, writer_session, wakeups, detach_rx)
        });

        let mut reader_stream = stream;
        loop {
            let msg = match protocol::recv_message(&mut reader_stream) {
                Ok(m) => m,
                Err(err) => {
                    trace!("s({}): reading from client: {:#}", id, err);
                    break;
                }
            };
            match Request::try_from(msg) {
                Ok(Request::Data { bytes, eof }) => {
                    if !bytes.is_empty() {
                        session.feed(bytes);
                    }
                    if eof {
                        session.close_input();
                    }
                }
                Ok(Request::Detach) => {
                    info!("s({}): client detached", id);
                    break;
                }
                Ok(other) => {
                    warn!("s({}): unexpected message while attached: {:?}", id, other);
                    break;
                }
                Err(err) => {
                    warn!("s({}): malformed message while attached: {:#}", id, err);
                    break;
                }
            }
        }

        let _ = detach_tx.try_send(());
        // shutting the socket down also unsticks a writer blocked on a
        // send, so the join below cannot hang on a stalled client
        let _ = reader_stream.shutdown(Shutdown::Both);
        let _ = writer.join();
        self.registry.detach(&id, &sink);
        info!("s({}): attachment closed", id);
        Ok(())
    }
}

fn writer_loop(
    mut stream: TcpStream,
    id: String,
    session: Arc<Session>,
    wakeups: Receiver<bool>,
    detach_rx: Receiver<()>,
) {
    loop {
        select! {
            recv(detach_rx) -> _ => break,
            recv(wakeups) -> wakeup => match wakeup {
                Ok(true) => {
                    // snapshot first so the output lock is not held
                    // across the socket write
                    let (start_pos, buf) = session.snapshot();
                    let msg = Message::output_chunk(start_pos, &buf);
                    if let Err(err) = protocol::send_message(&mut stream, &msg) {
                        trace!("s({}): writing DATA to client: {:#}", id, err);
                        break;
                    }
                }
                Ok(false) => {
                    info!("s({}): terminate event, killing shell", id);
                    session.kill();
                    break;
                }
                Err(_) => break,
            },
        }
    }
    // unblock the reader if it is parked on a recv
    let _ = stream.shutdown(Shutdown::Both);
}
