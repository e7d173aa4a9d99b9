use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use anyhow::Context;
use libmyscreen::{config::Config, daemon::Server, protocol::Client};

/// An in-process daemon bound to an ephemeral port, shut down
/// gracefully when dropped. The server handle stays available so
/// tests can inspect the session table directly.
pub struct Proc {
    pub port: u16,
    pub server: Arc<Server>,
    shutdown: Arc<AtomicBool>,
    serve_handle: Option<thread::JoinHandle<anyhow::Result<()>>>,
}

impl Proc {
    pub fn new() -> anyhow::Result<Proc> {
        let listener = TcpListener::bind("127.0.0.1:0").context("binding test listener")?;
        let port = listener.local_addr().context("resolving listener addr")?.port();

        // a short grace period keeps test teardown snappy
        let config = Config { shutdown_grace_ms: Some(50), ..Config::default() };
        let server = Server::new(config);
        let shutdown = server.shutdown_flag();
        let serve_server = Arc::clone(&server);
        let serve_handle = thread::spawn(move || Server::serve(serve_server, listener));

        Ok(Proc { port, server, shutdown, serve_handle: Some(serve_handle) })
    }

    pub fn client(&self) -> anyhow::Result<Client> {
        Client::connect(self.port)
    }

    /// Flip the shutdown flag without waiting for the drain.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        self.begin_shutdown();
        if let Some(handle) = self.serve_handle.take() {
            let _ = handle.join();
        }
    }
}
