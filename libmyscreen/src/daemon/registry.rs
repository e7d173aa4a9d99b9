use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::Rng as _;
use tracing::info;

use super::{
    notify::{Event, Sink},
    session::Session,
};
use crate::{config::Config, consts};

#[derive(Debug, PartialEq, Eq)]
pub enum AttachError {
    /// No session with that id is in the table.
    NotFound,
    /// Another client currently holds the attachment.
    Busy,
}

#[derive(Debug)]
pub enum CreateError {
    /// The requested id is already in the table.
    IdTaken,
    /// The shell could not be spawned.
    Spawn(anyhow::Error),
}

/// The session table: id -> session, plus id -> subscriber sinks.
/// Both maps live under one lock, which is never held across I/O;
/// everything done under it is constant-time map surgery plus the
/// (cheap) shell spawn on create.
pub struct Registry {
    shell: String,
    output_buffer_bytes: usize,
    notify_tx: Sender<Event>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    /// Kept as a list for symmetry with broadcast, but the
    /// single-attach policy means it never holds more than one sink.
    subs: HashMap<String, Vec<Sink>>,
}

impl Registry {
    /// Build an empty registry plus the receive end of the event queue
    /// the caller must hand to the notification dispatcher.
    pub fn new(config: &Config) -> (Arc<Registry>, Receiver<Event>) {
        let (notify_tx, notify_rx) = bounded(consts::NOTIFY_QUEUE_DEPTH);
        let registry = Arc::new(Registry {
            shell: String::from(config.shell()),
            output_buffer_bytes: config.output_buffer_bytes(),
            notify_tx,
            inner: Mutex::new(Inner::default()),
        });
        (registry, notify_rx)
    }

    /// Snapshot of the live session ids, sorted for stable output.
    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The session registered under the given id, if any.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(id).map(Arc::clone)
    }

    /// Create a session under the requested id, or under a freshly
    /// generated one if no id was requested. The creating client's
    /// sink is subscribed in the same critical section, so nobody can
    /// steal the attachment between create and attach.
    pub fn create(
        &self,
        requested: Option<&str>,
        sink: Sink,
    ) -> Result<(String, Arc<Session>), CreateError> {
        let mut inner = self.inner.lock().unwrap();

        let id = match requested {
            Some(id) => {
                if inner.sessions.contains_key(id) {
                    return Err(CreateError::IdTaken);
                }
                String::from(id)
            }
            None => loop {
                let id = generate_id();
                if !inner.sessions.contains_key(&id) {
                    break id;
                }
            },
        };

        let session =
            Session::spawn(&id, &self.shell, self.output_buffer_bytes, self.notify_tx.clone())
                .map_err(CreateError::Spawn)?;
        inner.sessions.insert(id.clone(), Arc::clone(&session));
        inner.subs.insert(id.clone(), vec![sink]);
        Ok((id, session))
    }

    /// Subscribe a sink to the named session. Fails if the session is
    /// gone or some other client already holds the attachment.
    pub fn attach(&self, id: &str, sink: Sink) -> Result<Arc<Session>, AttachError> {
        let mut inner = self.inner.lock().unwrap();
        let session = match inner.sessions.get(id) {
            Some(s) => Arc::clone(s),
            None => return Err(AttachError::NotFound),
        };
        let subs = inner.subs.entry(String::from(id)).or_default();
        if !subs.is_empty() {
            return Err(AttachError::Busy);
        }
        subs.push(sink);
        Ok(session)
    }

    /// Unsubscribe the exact sink instance. The session itself stays in
    /// the table, ready for a future attach. Missing is not an error.
    pub fn detach(&self, id: &str, sink: &Sink) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subs.get_mut(id) {
            subs.retain(|s| !s.same_sink(sink));
        }
    }

    /// Kill the named session: remove it from the table, SIGKILL the
    /// shell, then tell its subscribers to terminate. By the time this
    /// returns a LIST can no longer observe the id.
    pub fn kill(&self, id: &str) -> bool {
        let (session, sinks) = {
            let mut inner = self.inner.lock().unwrap();
            let session = match inner.sessions.remove(id) {
                Some(s) => s,
                None => return false,
            };
            let sinks = inner.subs.remove(id).unwrap_or_default();
            (session, sinks)
        };
        info!("s({}): killed", id);
        session.kill();
        for sink in sinks.iter() {
            sink.terminate();
        }
        true
    }

    /// Drop a session whose shell exited on its own. A no-op if a KILL
    /// already removed it.
    pub fn remove_exited(&self, id: &str) {
        let (session, sinks) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.sessions.remove(id) {
                Some(s) => (s, inner.subs.remove(id).unwrap_or_default()),
                None => return,
            }
        };
        session.close_input();
        for sink in sinks.iter() {
            sink.terminate();
        }
    }

    /// Copy of the sinks currently subscribed to the given id.
    pub fn sinks(&self, id: &str) -> Vec<Sink> {
        let inner = self.inner.lock().unwrap();
        inner.subs.get(id).cloned().unwrap_or_default()
    }

    /// Publish a synthetic output notification, so a fresh attachment
    /// immediately receives the buffered history.
    pub fn notify_output(&self, id: &str) {
        let _ = self.notify_tx.send(Event::Output(String::from(id)));
    }

    /// Shutdown, step one: tell every attachment to terminate.
    pub fn broadcast_terminate(&self) {
        let sinks: Vec<Sink> = {
            let inner = self.inner.lock().unwrap();
            inner.subs.values().flatten().cloned().collect()
        };
        for sink in sinks.iter() {
            sink.terminate();
        }
    }

    /// Shutdown, final sweep: kill whatever sessions are still in the
    /// table so no shell outlives the daemon.
    pub fn kill_remaining(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.subs.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in sessions.iter() {
            session.kill();
        }
    }
}

/// Uniform independent draws from the lowercase hex alphabet,
/// resampled by the caller on collision.
fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..consts::ID_LEN)
        .map(|_| consts::ID_ALPHABET[rng.gen_range(0..consts::ID_ALPHABET.len())] as char)
        .collect()
}
