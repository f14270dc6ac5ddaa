//! SIGINT/SIGTERM handling and cooperative cancellation.
//!
//! The signal handler only flips a process-wide flag. Long-running commands
//! poll a [`CancelToken`], and the pipeline checks it at stage boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the process-wide interrupt flag.
pub fn install_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

pub fn signal_received() -> bool {
    SIGNALLED.load(Ordering::SeqCst)
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    watch_signals: bool,
}

impl CancelToken {
    /// Token that trips on `cancel()` or on a received signal.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        }
    }

    /// Token that ignores process signals. Used by tests so they can run in
    /// parallel without sharing state.
    pub fn detached() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            watch_signals: false,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || (self.watch_signals && signal_received())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
