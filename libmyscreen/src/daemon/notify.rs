use std::{sync::Arc, thread};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, trace};

use super::registry::Registry;

/// Events flowing from session internals to the dispatcher thread.
#[derive(Debug)]
pub enum Event {
    /// The named session's rolling buffer has new bytes.
    Output(String),
    /// The named session's shell exited on its own (both output
    /// pipes hit EOF and the child has been reaped).
    Exited(String),
}

/// A subscriber sink: the channel by which an attachment learns that
/// there is news. `true` means "new output, wake up and snapshot",
/// `false` means "terminate the attachment now".
///
/// The channel has room for one coalesced wakeup plus one pending
/// terminate. Wakeups may be dropped while one is already pending,
/// terminates never are.
#[derive(Clone)]
pub struct Sink {
    tx: Sender<bool>,
}

impl Sink {
    pub fn pair() -> (Sink, Receiver<bool>) {
        let (tx, rx) = bounded(2);
        (Sink { tx }, rx)
    }

    /// Wake the attachment. Only the dispatcher thread calls this, so
    /// the emptiness check cannot race another wakeup and a pending
    /// event always leaves a slot free for a terminate.
    pub fn notify(&self) {
        if self.tx.is_empty() {
            let _ = self.tx.try_send(true);
        }
    }

    /// Tell the attachment to terminate. If the slot is already taken
    /// by another terminate the loss is harmless.
    pub fn terminate(&self) {
        let _ = self.tx.try_send(false);
    }

    /// Identity comparison, so detach removes exactly the sink that
    /// was attached and not merely one with the same session id.
    pub fn same_sink(&self, other: &Sink) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Drain the event queue, fanning each output event out to the
/// session's current subscribers. The subscriber list is copied under
/// the registry lock and published outside it.
pub fn spawn_dispatcher(registry: Arc<Registry>, events: Receiver<Event>) {
    thread::spawn(move || {
        for event in events.iter() {
            match event {
                Event::Output(id) => {
                    for sink in registry.sinks(&id) {
                        sink.notify();
                    }
                }
                Event::Exited(id) => {
                    info!("s({}): shell exited, dropping session", id);
                    registry.remove_exited(&id);
                }
            }
        }
        trace!("event queue closed, dispatcher exiting");
    });
}
