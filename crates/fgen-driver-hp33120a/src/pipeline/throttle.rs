//! Per-parameter wall-clock throttle for host automation.
//!
//! Automation can deliver a new value per audio block. The throttle lets at
//! most one post per window wake the worker; values arriving inside the
//! window are staged, so the latest still reaches the device on the
//! worker's next periodic wake.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{CommandPipeline, Param, ParamKind};

/// Lock-free throttle; one timestamp per parameter kind.
pub struct AutomationThrottle {
    origin: Instant,
    window: Duration,
    /// Nanoseconds since `origin` of the last signalled post, plus one
    /// (zero means never).
    last_post: Vec<AtomicU64>,
}

impl AutomationThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            origin: Instant::now(),
            window,
            last_post: (0..ParamKind::COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Post `param` to `pipeline`. Returns true if the worker was woken,
    /// false if the value was only staged.
    pub fn post(&self, pipeline: &CommandPipeline, param: Param) -> bool {
        if self.admit(param.kind()) {
            pipeline.queue(param);
            true
        } else {
            pipeline.stage(param);
            false
        }
    }

    fn admit(&self, kind: ParamKind) -> bool {
        let Some(last) = self.last_post.get(kind.index()) else {
            return false;
        };
        let now = u64::try_from(self.origin.elapsed().as_nanos())
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let window = u64::try_from(self.window.as_nanos()).unwrap_or(u64::MAX);
        let previous = last.load(Ordering::Relaxed);
        if previous != 0 && now.saturating_sub(previous) < window {
            return false;
        }
        last.compare_exchange(previous, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverOptions, Hp33120a};
    use crate::pipeline::PipelineTiming;
    use crate::sim::SimulatedInstrument;
    use std::sync::Arc;

    fn pipeline() -> CommandPipeline {
        let driver = Arc::new(Hp33120a::new(
            Box::new(SimulatedInstrument::new()),
            DriverOptions::default(),
        ));
        CommandPipeline::new(driver, PipelineTiming::default())
    }

    #[test]
    fn one_wake_per_window() {
        let pipeline = pipeline();
        let throttle = AutomationThrottle::new(Duration::from_secs(60));
        assert!(throttle.post(&pipeline, Param::Frequency(100.0)));
        assert!(!throttle.post(&pipeline, Param::Frequency(200.0)));
        assert!(!throttle.post(&pipeline, Param::Frequency(300.0)));
        // Other kinds have their own window
        assert!(throttle.post(&pipeline, Param::Amplitude(1.0)));
        // The staged value is still pending
        assert!(pipeline.has_pending(ParamKind::Frequency));
    }

    #[test]
    fn window_reopens() {
        let pipeline = pipeline();
        let throttle = AutomationThrottle::new(Duration::from_millis(20));
        assert!(throttle.post(&pipeline, Param::DutyCycle(10.0)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(throttle.post(&pipeline, Param::DutyCycle(20.0)));
    }
}
