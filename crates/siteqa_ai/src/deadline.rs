//! Deadline-bounded calls into external providers.
//!
//! Providers are plain blocking traits. The call runs on a helper thread while the
//! requesting thread waits for at most the configured timeout, polling a [`CancelToken`]
//! so a caller can give up early. A call that overruns is abandoned; its thread finishes
//! on its own and the late result is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Shared flag that lets a caller abandon an in-flight request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    TimedOut,
    Cancelled,
    /// The worker thread panicked or could not be spawned.
    Failed,
}

pub fn call_with_deadline<T, F>(
    name: &str,
    timeout: Duration,
    cancel: Option<&CancelToken>,
    f: F,
) -> Result<T, Interrupted>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
        return Err(Interrupted::Cancelled);
    }

    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("siteqa-{name}"))
        .spawn(move || {
            // Receiver may be gone after a timeout; the late result is discarded.
            let _ = tx.send(f());
        })
        .map_err(|_| Interrupted::Failed)?;

    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(Interrupted::TimedOut);
        }
        let wait = (deadline - now).min(CANCEL_POLL);
        match rx.recv_timeout(wait) {
            Ok(v) => return Ok(v),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
                    return Err(Interrupted::Cancelled);
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Err(Interrupted::Failed),
        }
    }
}
