//! Single-threaded FIFO command dispatcher.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{Error, Result};

/// A queued unit of work. Owns every buffer and address it captures; all of
/// them are released when the task finishes, on every exit path.
pub(super) type Task = Box<dyn FnOnce() + Send>;

/// Executes submitted tasks one at a time, in submission order, on a single
/// dedicated thread. At most one engine call is ever in flight; a task that
/// blocks stalls every later task (accepted head-of-line blocking).
#[derive(Debug)]
pub(super) struct Dispatcher {
    tx: Option<mpsc::UnboundedSender<Task>>,
    thr: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let thr = thread::spawn(move || Self::run(rx));
        Self {
            tx: Some(tx),
            thr: Some(thr),
        }
    }

    /// Enqueues a task in FIFO order relative to all previously submitted
    /// tasks and returns immediately. Never blocks the caller.
    pub fn submit(&self, task: Task) -> Result<()> {
        match self.tx.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| Error::Closed),
            None => Err(Error::Closed),
        }
    }

    fn run(mut rx: mpsc::UnboundedReceiver<Task>) {
        debug!("dispatch thread started");
        while let Some(task) = rx.blocking_recv() {
            // A panicking task forfeits only its own outcome.
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("dispatched task panicked");
            }
        }
        debug!("dispatch thread terminating");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(h) = self.thr.take() {
            let _ = h.join();
        }
    }
}
