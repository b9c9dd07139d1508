//! Message-loop dispatch for user-facing callbacks.
//!
//! Background workers never call log sinks or completion callbacks directly
//! on their own thread; they hand a closure to a [`Dispatcher`]. A host with
//! a UI message loop implements the trait on top of it. [`MessageLoop`] is a
//! stand-alone loop for headless hosts and tests, [`Immediate`] runs the
//! closure inline.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Result;
use crate::worker::WorkerHandle;

/// A unit of work posted to the message thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Human-readable log line consumer.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Posts closures onto the thread that owns GUI-observable state.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs every job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Dispatcher for Immediate {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Dedicated message thread draining an unbounded FIFO of jobs.
pub struct MessageLoop {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl MessageLoop {
    pub fn start() -> Result<Arc<Self>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = WorkerHandle::spawn("fgen-message-loop", move || {
            while let Some(job) = rx.blocking_recv() {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    warn!("Message loop job panicked");
                }
            }
        })?;

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Block until every job posted before this call has run.
    pub fn flush(&self, timeout: Duration) -> bool {
        let done = Arc::new(crate::worker::Event::new());
        let signal = done.clone();
        self.dispatch(Box::new(move || signal.signal()));
        done.wait_timeout(timeout)
    }

    /// Stop accepting jobs, run the ones already queued, then join.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.sender.lock().take();
        match self.worker.lock().take() {
            Some(worker) => worker.join_timeout(timeout),
            None => true,
        }
    }
}

impl Dispatcher for MessageLoop {
    fn dispatch(&self, job: Job) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                if tx.send(job).is_err() {
                    warn!("Message loop closed; dropping job");
                }
            }
            None => warn!("Message loop shut down; dropping job"),
        }
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

/// Wrap `sink` so every line is delivered through `dispatcher`.
pub fn marshal_sink(dispatcher: Arc<dyn Dispatcher>, sink: LogSink) -> LogSink {
    Arc::new(move |line: &str| {
        let sink = sink.clone();
        let line = line.to_string();
        dispatcher.dispatch(Box::new(move || sink(&line)));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::ThreadId;

    #[test]
    fn immediate_runs_inline() {
        let ran = Arc::new(Mutex::new(None::<ThreadId>));
        let slot = ran.clone();
        Immediate.dispatch(Box::new(move || {
            *slot.lock() = Some(std::thread::current().id());
        }));
        assert_eq!(*ran.lock(), Some(std::thread::current().id()));
    }

    #[test]
    fn message_loop_preserves_order_on_its_own_thread() {
        let message_loop = MessageLoop::start().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            message_loop.dispatch(Box::new(move || {
                seen.lock().push((i, std::thread::current().id()));
            }));
        }
        assert!(message_loop.flush(Duration::from_secs(1)));

        let seen = seen.lock();
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(seen.iter().all(|(_, id)| *id != std::thread::current().id()));
    }

    #[test]
    fn marshalled_sink_delivers_lines() {
        let message_loop = MessageLoop::start().unwrap();
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink: LogSink = {
            let lines = lines.clone();
            Arc::new(move |line: &str| lines.lock().push(line.to_string()))
        };
        let marshalled = marshal_sink(message_loop.clone(), sink);
        marshalled("SYST:REM -> +0,\"No error\"");
        assert!(message_loop.flush(Duration::from_secs(1)));
        assert_eq!(lines.lock().as_slice(), ["SYST:REM -> +0,\"No error\""]);
    }

    #[test]
    fn dispatch_after_shutdown_is_dropped() {
        let message_loop = MessageLoop::start().unwrap();
        assert!(message_loop.shutdown(Duration::from_secs(1)));
        message_loop.dispatch(Box::new(|| panic!("must not run")));
    }
}
