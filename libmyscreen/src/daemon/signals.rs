use std::sync::{atomic::AtomicBool, Arc};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, flag};
use tracing::info;

/// Wires interrupt handling to the server's shutdown flag.
pub struct Handler {
    shutdown: Arc<AtomicBool>,
}

impl Handler {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Handler { shutdown }
    }

    /// The first term signal flips the shutdown flag so the accept
    /// loop can drain gracefully; mashing ^C a second time exits
    /// immediately instead of waiting out the drain.
    pub fn register(self) -> anyhow::Result<()> {
        for sig in TERM_SIGNALS {
            // When terminated by a second term signal, exit with exit code 1.
            // This will do nothing the first time (because shutdown is false).
            flag::register_conditional_shutdown(*sig, 1, Arc::clone(&self.shutdown))
                .context("registering conditional shutdown")?;
            // But this will "arm" the above for the second time, by setting it
            // to true. The order of registering these is important, if you put
            // this one first, it will first arm and then terminate - all in
            // the first round.
            flag::register(*sig, Arc::clone(&self.shutdown))
                .context("registering shutdown flag")?;
        }
        info!("registered shutdown signal handlers");
        Ok(())
    }
}
