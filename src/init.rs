//! Reference-counted process-global initialization.
//!
//! Writing to a pipe whose read end is gone raises `SIGPIPE`, which kills
//! the process before `write` can report `EPIPE`. While at least one
//! supervised process exists, `SIGPIPE` is ignored so broken pipes
//! surface as ordinary errors. The previous disposition is restored when
//! the last process is destroyed.

use crate::error::Result;
use nix::sys::signal::{signal, SigHandler, Signal};
use std::sync::Mutex;

struct Global {
    refs: usize,
    previous: Option<SigHandler>,
}

static GLOBAL: Mutex<Global> = Mutex::new(Global {
    refs: 0,
    previous: None,
});

/// Enters the global bracket; the first caller installs the `SIGPIPE`
/// ignore. Safe to call from multiple threads.
pub(crate) fn init() -> Result<()> {
    let mut global = GLOBAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if global.refs == 0 {
        // SAFETY: SigIgn carries no handler code, so no signal-safety
        // constraints apply.
        let previous = unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;
        global.previous = Some(previous);
    }

    global.refs += 1;
    Ok(())
}

/// Leaves the global bracket; the last caller restores the saved
/// `SIGPIPE` disposition.
pub(crate) fn deinit() {
    let mut global = GLOBAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if global.refs == 0 {
        return;
    }

    global.refs -= 1;
    if global.refs == 0 {
        if let Some(previous) = global.previous.take() {
            // SAFETY: restoring a disposition previously returned by
            // signal() for this same signal.
            let _ = unsafe { signal(Signal::SIGPIPE, previous) };
        }
    }
}
