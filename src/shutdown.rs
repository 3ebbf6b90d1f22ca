//! Cooperative shutdown
//!
//! Workers poll `is_requested()` at the top of every iteration and sleep
//! through `wait_timeout()`, which returns early once shutdown is requested.
//! Nothing is interrupted mid-operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Shared stop flag for every background loop
pub struct ShutdownSignal {
    requested: AtomicBool,
    /// Dropped on request; disconnects `receiver` and wakes all sleepers
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Self {
            requested: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Ask every worker to stop after its current unit of work
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.sender.lock().take();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`; returns true if shutdown was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_requested(),
            // Nothing is ever sent, so any other outcome means disconnected
            _ => true,
        }
    }

    /// Receiver that becomes ready (disconnected) on shutdown, for `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
