//! Command pipeline: last-write-wins slots drained by one worker.
//!
//! Producers on realtime, automation and UI threads post values with
//! [`CommandPipeline::queue`]. Each parameter kind owns one slot holding the
//! latest value and a dirty flag, so any number of posts between two worker
//! wake-ups cost one bus write. The producer path never locks the session and
//! never allocates.
//!
//! Updates to one kind are applied in post order (latest wins). Updates to
//! different kinds are not ordered relative to each other; callers needing
//! "shape, then duty" ordering should use the driver directly.
//!
//! Fast writes do not read the error queue, so the worker polls `SYST:ERR?`
//! periodically and forwards any error to the log sink as
//! `[DEVICE ERROR] <resp>`. Such errors arrive late and cannot be tied to
//! the command that caused them.

pub mod param;
pub mod throttle;

pub use param::{Param, ParamKind};
pub use throttle::AutomationThrottle;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use fgen_core::config::PipelineConfig;
use fgen_core::{Event, Result, WorkerHandle};

use crate::driver::Hp33120a;
use crate::scpi;
use crate::types::{AmSource, ModShape, ModSource, TriggerSource, Waveform};

/// Error-queue entries read per drain.
const DRAIN_LIMIT: usize = 4;

/// Worker timing.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTiming {
    pub wake_interval: Duration,
    pub error_drain_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PipelineTiming {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl PipelineTiming {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            wake_interval: config.wake_interval(),
            error_drain_interval: config.error_drain_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// One latest-value cell.
#[derive(Debug, Default)]
struct Slot {
    bits: AtomicU64,
    dirty: AtomicBool,
}

impl Slot {
    fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.dirty.store(true, Ordering::Release);
    }

    fn take(&self) -> Option<f64> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(f64::from_bits(self.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }
}

struct Shared {
    driver: Arc<Hp33120a>,
    slots: Vec<Slot>,
    wake: Event,
    shutdown: AtomicBool,
    timing: PipelineTiming,
}

/// See the module docs.
pub struct CommandPipeline {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl CommandPipeline {
    /// Build the pipeline. Posts are accepted immediately but nothing is
    /// applied until [`start`](Self::start).
    pub fn new(driver: Arc<Hp33120a>, timing: PipelineTiming) -> Self {
        let slots = (0..ParamKind::COUNT).map(|_| Slot::default()).collect();
        Self {
            shared: Arc::new(Shared {
                driver,
                slots,
                wake: Event::new(),
                shutdown: AtomicBool::new(false),
                timing,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker. Calling again while running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.shared.shutdown.store(false, Ordering::Release);
        let shared = self.shared.clone();
        *worker = Some(WorkerHandle::spawn("fgen-command-pipeline", move || shared.run())?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Post `param` and wake the worker.
    pub fn queue(&self, param: Param) {
        self.stage(param);
        self.shared.wake.signal();
    }

    /// Store `param` without waking the worker; it is applied on the next
    /// periodic wake-up.
    pub fn stage(&self, param: Param) {
        if let Some(slot) = self.shared.slots.get(param.kind().index()) {
            slot.store(param.encode());
        }
    }

    pub fn has_pending(&self, kind: ParamKind) -> bool {
        self.shared
            .slots
            .get(kind.index())
            .is_some_and(|s| s.dirty.load(Ordering::Acquire))
    }

    /// Signal the worker, wait for it and join (bounded).
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.signal();
        if !worker.join_timeout(self.shared.timing.shutdown_timeout) {
            warn!("Command pipeline did not stop in time");
        }
    }
}

impl Drop for CommandPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

macro_rules! queue_helpers {
    ($($fn:ident => $variant:ident($ty:ty)),+ $(,)?) => {
        impl CommandPipeline {
            $(
                pub fn $fn(&self, value: $ty) {
                    self.queue(Param::$variant(value));
                }
            )+
        }
    };
}

queue_helpers! {
    queue_frequency => Frequency(f64),
    queue_amplitude => Amplitude(f64),
    queue_offset => Offset(f64),
    queue_phase => Phase(f64),
    queue_duty_cycle => DutyCycle(f64),
    queue_waveform => Waveform(Waveform),
    queue_output_enabled => OutputEnabled(bool),
    queue_am_enabled => AmEnabled(bool),
    queue_am_depth => AmDepth(f64),
    queue_am_source => AmSource(AmSource),
    queue_am_internal_shape => AmInternalShape(ModShape),
    queue_am_internal_frequency => AmInternalFrequency(f64),
    queue_fm_enabled => FmEnabled(bool),
    queue_fm_deviation => FmDeviation(f64),
    queue_fm_source => FmSource(ModSource),
    queue_fm_internal_shape => FmInternalShape(ModShape),
    queue_fm_internal_frequency => FmInternalFrequency(f64),
    queue_fsk_enabled => FskEnabled(bool),
    queue_fsk_frequency => FskFrequency(f64),
    queue_fsk_source => FskSource(ModSource),
    queue_fsk_internal_rate => FskInternalRate(f64),
    queue_sweep_enabled => SweepEnabled(bool),
    queue_sweep_start => SweepStart(f64),
    queue_sweep_stop => SweepStop(f64),
    queue_sweep_time => SweepTime(f64),
    queue_burst_enabled => BurstEnabled(bool),
    queue_burst_cycles => BurstCycles(u32),
    queue_burst_phase => BurstPhase(f64),
    queue_burst_internal_period => BurstInternalPeriod(f64),
    queue_burst_source => BurstSource(ModSource),
    queue_sync_enabled => SyncEnabled(bool),
    queue_trigger_source => TriggerSource(TriggerSource),
}

impl Shared {
    fn run(&self) {
        let mut last_drain = Instant::now();
        while !self.shutdown.load(Ordering::Acquire) {
            self.wake.wait_timeout(self.timing.wake_interval);
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if !self.driver.is_connected() {
                continue;
            }

            self.apply_pending();

            if last_drain.elapsed() >= self.timing.error_drain_interval {
                last_drain = Instant::now();
                self.drain_errors();
            }
        }
        debug!("Command pipeline worker exiting");
    }

    fn apply_pending(&self) {
        for (kind, slot) in ParamKind::ALL.iter().zip(&self.slots) {
            let Some(value) = slot.take() else {
                continue;
            };
            match Param::decode(*kind, value) {
                Some(param) => {
                    if let Err(err) = self.driver.set_param(param) {
                        debug!(param = %kind, error = %err, "Pipeline write failed");
                    }
                }
                None => debug!(param = %kind, value, "Dropping undecodable value"),
            }
        }
    }

    fn drain_errors(&self) {
        self.driver.transaction(|d| {
            // An ARB download reads its own replies
            if d.is_downloading() {
                return;
            }
            for _ in 0..DRAIN_LIMIT {
                let reply = match d.query(scpi::SYST_ERR) {
                    Ok(reply) => reply,
                    Err(_) => return,
                };
                if reply.is_empty() || scpi::is_no_error(&reply) {
                    return;
                }
                warn!(reply = %reply, "Device error reported by periodic drain");
                d.set_last_error(reply.as_str());
                d.log(&format!("[DEVICE ERROR] {}", reply));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverOptions;
    use crate::sim::SimulatedInstrument;

    fn fast_timing() -> PipelineTiming {
        PipelineTiming {
            wake_interval: Duration::from_millis(10),
            error_drain_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    fn setup() -> (SimulatedInstrument, Arc<Hp33120a>, CommandPipeline) {
        let sim = SimulatedInstrument::new();
        let driver = Arc::new(Hp33120a::new(
            Box::new(sim.clone()),
            DriverOptions {
                settle_after_connect: Duration::ZERO,
                ..Default::default()
            },
        ));
        driver.connect("GPIB0::10::INSTR").unwrap();
        sim.clear_wire();
        let pipeline = CommandPipeline::new(driver.clone(), fast_timing());
        (sim, driver, pipeline)
    }

    fn settle() {
        std::thread::sleep(Duration::from_millis(150));
    }

    #[test]
    fn slot_keeps_latest_value() {
        let slot = Slot::default();
        assert_eq!(slot.take(), None);
        slot.store(1.0);
        slot.store(2.0);
        assert_eq!(slot.take(), Some(2.0));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn posts_before_start_collapse_to_last_value() {
        let (sim, _driver, pipeline) = setup();
        for i in 0..1000 {
            pipeline.queue_amplitude(f64::from(i) / 1000.0);
        }
        assert!(pipeline.has_pending(ParamKind::Amplitude));
        pipeline.start().unwrap();
        settle();
        pipeline.shutdown();

        assert_eq!(sim.commands(), vec!["VOLT 0.999000"]);
    }

    #[test]
    fn choices_go_through_checked_write() {
        let (sim, _driver, pipeline) = setup();
        pipeline.queue_waveform(Waveform::Triangle);
        pipeline.queue_waveform(Waveform::Square);
        pipeline.queue_output_enabled(true);
        pipeline.start().unwrap();
        settle();
        pipeline.shutdown();

        let wire = sim.wire();
        let shape = wire.iter().position(|l| l == "FUNCtion:SHAPe SQU").unwrap();
        assert_eq!(wire[shape + 1], "SYST:ERR?");
        assert_eq!(sim.count_of("FUNCtion:SHAPe TRI"), 0);
        assert_eq!(sim.count_of("OUTP ON"), 1);
    }

    #[test]
    fn disconnected_worker_keeps_values_pending() {
        let (sim, driver, pipeline) = setup();
        driver.disconnect();
        sim.clear_wire();
        pipeline.start().unwrap();
        pipeline.queue_frequency(500.0);
        settle();
        assert!(pipeline.has_pending(ParamKind::Frequency));
        assert!(sim.wire().is_empty());
        pipeline.shutdown();
    }

    #[test]
    fn periodic_drain_reports_device_errors() {
        let (sim, driver, pipeline) = setup();
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink_lines = lines.clone();
        driver.set_log_sink(Some(Arc::new(move |l: &str| sink_lines.lock().push(l.to_string()))));
        sim.inject_error(-222, "Data out of range");

        pipeline.start().unwrap();
        settle();
        pipeline.shutdown();

        assert!(lines
            .lock()
            .iter()
            .any(|l| l == "[DEVICE ERROR] -222,\"Data out of range\""));
        assert_eq!(driver.last_error(), "-222,\"Data out of range\"");
    }

    #[test]
    fn periodic_drain_stands_down_during_download() {
        let (sim, driver, pipeline) = setup();
        pipeline.start().unwrap();
        let busy = driver.download_lock.lock();
        assert!(driver.is_downloading());
        sim.inject_error(781, "Not enough memory");
        settle();
        assert_eq!(sim.pending_errors(), 1);
        assert_eq!(sim.count_of("SYST:ERR?"), 0);

        drop(busy);
        settle();
        pipeline.shutdown();
        assert_eq!(sim.pending_errors(), 0);
    }

    #[test]
    fn start_is_idempotent_and_shutdown_joins() {
        let (_sim, _driver, pipeline) = setup();
        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        pipeline.shutdown();
        assert!(!pipeline.is_running());
        pipeline.shutdown();
    }
}
