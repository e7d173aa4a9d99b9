use std::time;

/// The TCP port the daemon listens on unless the config says otherwise.
pub const SERVER_PORT: u16 = 8998;

/// Cap on the rolling output buffer kept per session. Once the shell
/// has emitted more than this, the oldest bytes fall off the front.
pub const OUTPUT_BUF_BYTES: usize = 64 * 1024;

/// How much we try to read from a shell pipe or from stdin per cycle.
pub const READ_CHUNK_BYTES: usize = 4096;

/// Frames longer than this are rejected as malformed rather than
/// buffered.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Depth of the per-session queue of input chunks headed for the
/// shell's stdin. Feeding blocks once this fills up, which is what
/// keeps a chatty client from outrunning a wedged shell.
pub const INPUT_QUEUE_DEPTH: usize = 16;

/// Depth of the daemon-wide event queue between the output pumps and
/// the notification dispatcher.
pub const NOTIFY_QUEUE_DEPTH: usize = 128;

pub const ID_LEN: usize = 6;
pub const ID_ALPHABET: &[u8] = b"0123456789abcdef";

/// How often the accept loop wakes up to check the shutdown flag.
pub const ACCEPT_POLL_DUR: time::Duration = time::Duration::from_millis(100);

/// How long the daemon waits for attachments to wind down after
/// broadcasting the terminate event.
pub const SHUTDOWN_GRACE: time::Duration = time::Duration::from_secs(1);

/// How often the attached client polls its worker threads and the
/// interrupt flag.
pub const JOIN_POLL_DUR: time::Duration = time::Duration::from_millis(50);

pub const PID_FILE: &str = "myscreend.pid";
pub const LOG_FILE: &str = "myscreend.log";

// If set to "true", the daemon will autodaemonize after launch.
pub const AUTODAEMONIZE_VAR: &str = "MYSCREEN__INTERNAL__AUTODAEMONIZE";
