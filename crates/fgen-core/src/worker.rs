//! Thread plumbing shared by the background workers.
//!
//! - [`Event`]: auto-reset wake-up event with a timed wait
//! - [`WorkerHandle`]: named OS thread with a bounded join

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{FgenError, Result};

/// Auto-reset event.
///
/// `signal` latches until the next `wait_timeout` consumes it, so a signal
/// raised while the waiter is busy is not lost.
#[derive(Debug, Default)]
pub struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_one();
    }

    /// Wait until signalled or `timeout` elapses. Returns true if signalled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signalled, false)
    }
}

/// Completion latch set by the worker thread on exit.
#[derive(Debug, Default)]
struct Finished {
    done: Mutex<bool>,
    cond: Condvar,
}

struct FinishGuard(Arc<Finished>);

impl Drop for FinishGuard {
    // Runs on normal return and on unwind.
    fn drop(&mut self) {
        *self.0.done.lock() = true;
        self.0.cond.notify_all();
    }
}

/// A named background thread that can be joined with a deadline.
pub struct WorkerHandle {
    name: String,
    thread: Option<JoinHandle<()>>,
    finished: Arc<Finished>,
}

impl WorkerHandle {
    /// Spawn `body` on a new thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let finished = Arc::new(Finished::default());
        let guard = FinishGuard(finished.clone());
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body();
            })
            .map_err(|e| FgenError::Worker(format!("failed to spawn {}: {}", name, e)))?;

        debug!(worker = name, "Worker started");
        Ok(Self {
            name: name.to_string(),
            thread: Some(thread),
            finished,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.done.lock()
    }

    /// Join, waiting at most `timeout`.
    ///
    /// Returns false and detaches the thread if it is still running at the
    /// deadline.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut done = self.finished.done.lock();
            while !*done {
                if self.finished.cond.wait_until(&mut done, deadline).timed_out() {
                    break;
                }
            }
            if !*done {
                warn!(
                    worker = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker did not stop in time; detaching"
                );
                self.thread.take();
                return false;
            }
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = %self.name, "Worker panicked");
            }
        }
        debug!(worker = %self.name, "Worker stopped");
        true
    }
}
