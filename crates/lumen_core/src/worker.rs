//! Background worker threads with a bounded stop
//!
//! Each worker gets a stop flag it must poll. On exit (normal or panic) a
//! drop guard signals a channel so [`Worker::stop`] can wait with a timeout
//! and detach a thread that does not respond.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, RecvTimeoutError};
use tracing::{debug, warn};

use crate::error::EngineResult;

/// Signals the exit channel when the worker body returns or unwinds
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// A named thread with a cooperative stop flag
pub struct Worker {
    name: String,
    stop_flag: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a new thread. `body` receives the stop flag and should
    /// return soon after it becomes true.
    pub fn spawn<F>(name: &str, body: F) -> EngineResult<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = bounded(1);

        let flag = Arc::clone(&stop_flag);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _guard = DoneGuard(done_tx);
            body(flag);
        })?;

        debug!(worker = name, "Worker started");
        Ok(Self {
            name: name.to_string(),
            stop_flag,
            done,
            handle: Some(handle),
        })
    }

    /// Whether the thread is still executing
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raise the stop flag and wait up to `timeout` for the thread to exit.
    /// Returns false if the thread had to be detached.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop_flag.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(worker = %self.name, "Worker panicked");
                }
                debug!(worker = %self.name, "Worker stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(worker = %self.name, ?timeout, "Worker did not stop in time, detaching");
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Dropped without stop(): ask the thread to exit but do not block
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}
