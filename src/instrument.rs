//! Host façade.
//!
//! [`Instrument`] owns every moving part of one 33120A: the driver, the
//! command pipeline, the ARB manager, the LFO bank and the message loop that
//! delivers user-facing callbacks. Teardown runs in dependency order so no
//! worker outlives what it references:
//!
//! 1. LFO threads
//! 2. ARB upload worker
//! 3. command pipeline worker
//! 4. driver session (`SYST:LOC`, then close)
//! 5. message loop (queued callbacks still run)

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use fgen_core::{marshal_sink, Dispatcher, FgenConfig, LogSink, MessageLoop};
use fgen_driver_hp33120a::{
    ArbManager, AutomationThrottle, CommandPipeline, DriverOptions, Hp33120a, LfoBank, Param,
    PipelineTiming, SimulatedInstrument,
};
use fgen_visa::{Transport, VisaTransport};

use crate::midi::{self, NoteOn};

const MESSAGE_LOOP_DRAIN: Duration = Duration::from_secs(1);

pub struct Instrument {
    config: FgenConfig,
    driver: Arc<Hp33120a>,
    pipeline: CommandPipeline,
    arb: ArbManager,
    lfos: LfoBank,
    throttle: AutomationThrottle,
    message_loop: Arc<MessageLoop>,
    closed: AtomicBool,
}

impl Instrument {
    /// Bind the VISA library named by the configuration (or the platform
    /// default). A missing library is not an error here; `connect` reports it.
    pub fn open(config: FgenConfig) -> Result<Self> {
        let transport = VisaTransport::load(config.instrument.library.as_deref());
        Self::with_transport(config, Box::new(transport))
    }

    /// Run against an in-memory 33120A. The returned handle shares state with
    /// the instrument's transport.
    pub fn simulated(config: FgenConfig) -> Result<(Self, SimulatedInstrument)> {
        let sim = SimulatedInstrument::new();
        sim.seed_builtins();
        let instrument = Self::with_transport(config, Box::new(sim.clone()))?;
        Ok((instrument, sim))
    }

    pub fn with_transport(config: FgenConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let message_loop = MessageLoop::start().context("Failed to start message loop")?;
        let dispatcher: Arc<dyn Dispatcher> = message_loop.clone();

        let driver = Arc::new(Hp33120a::new(transport, DriverOptions::from_config(&config)));
        let pipeline =
            CommandPipeline::new(driver.clone(), PipelineTiming::from_config(&config.pipeline));
        pipeline.start().context("Failed to start command pipeline")?;
        let arb = ArbManager::new(driver.clone(), dispatcher, &config.arb)
            .context("Failed to start ARB manager")?;
        let lfos = LfoBank::new(driver.clone());
        let throttle = AutomationThrottle::new(config.pipeline.throttle());

        debug!(resource = %config.instrument.resource, "Instrument assembled");
        Ok(Self {
            config,
            driver,
            pipeline,
            arb,
            lfos,
            throttle,
            message_loop,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &FgenConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<Hp33120a> {
        &self.driver
    }

    pub fn pipeline(&self) -> &CommandPipeline {
        &self.pipeline
    }

    pub fn arb(&self) -> &ArbManager {
        &self.arb
    }

    pub fn lfos(&self) -> &LfoBank {
        &self.lfos
    }

    /// Connect to the configured resource.
    pub fn connect(&self) -> Result<()> {
        let resource = self.config.instrument.resource.clone();
        self.connect_to(&resource)
    }

    pub fn connect_to(&self, resource: &str) -> Result<()> {
        self.driver
            .connect(resource)
            .with_context(|| format!("Failed to connect to {}", resource))?;
        if let Err(err) = self.arb.sync_from_device() {
            debug!(error = %err, "Slot sync after connect failed");
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        self.driver.disconnect();
    }

    /// Install a log sink. Lines are delivered on the message loop thread.
    pub fn set_log_sink(&self, sink: Option<LogSink>) {
        let dispatcher: Arc<dyn Dispatcher> = self.message_loop.clone();
        self.driver
            .set_log_sink(sink.map(|sink| marshal_sink(dispatcher, sink)));
    }

    /// Post a host automation value through the per-kind throttle.
    pub fn automate(&self, param: Param) -> bool {
        self.throttle.post(&self.pipeline, param)
    }

    /// Handle a MIDI note-on. Returns the frequency posted, if any.
    pub fn note_on(&self, event: NoteOn) -> Option<f64> {
        if !self.driver.is_connected() {
            return None;
        }
        let hz = event.frequency(self.config.midi.reference_hz)?;
        self.pipeline.queue_frequency(hz);
        Some(hz)
    }

    /// Decode `path` into `slot` and upload it, blocking until done.
    pub fn upload_file(&self, slot: usize, path: &Path) -> Result<String> {
        self.arb
            .load_audio_file(slot, path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let outcome = self
            .arb
            .upload_slot(slot)
            .with_context(|| format!("Upload of slot {} failed", slot))?;
        Ok(outcome.message())
    }

    /// Wait for queued callbacks to run.
    pub fn flush_callbacks(&self) -> bool {
        self.message_loop.flush(MESSAGE_LOOP_DRAIN)
    }

    /// Stop every worker and release the session. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lfos.shutdown();
        self.arb.shutdown();
        self.pipeline.shutdown();
        self.driver.disconnect();
        self.message_loop.shutdown(MESSAGE_LOOP_DRAIN);
        info!("Instrument shut down");
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Status line shown for a MIDI note, e.g. `MIDI On: 69 -> Freq: 440.000 Hz`.
pub fn note_status(note: u8, hz: f64) -> String {
    format!("MIDI On: {} -> Freq: {}", note, midi::format_frequency(hz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgen_driver_hp33120a::SlotState;
    use parking_lot::Mutex;

    fn config() -> FgenConfig {
        let mut config = FgenConfig::default();
        config.pipeline.wake_interval_ms = 10;
        config.arb.ingest_delay_ms = 1;
        config
    }

    fn settle() {
        std::thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn note_on_posts_rounded_frequency() {
        let (instrument, sim) = Instrument::simulated(config()).unwrap();
        assert_eq!(instrument.note_on(NoteOn { note: 60, velocity: 90 }), None);

        instrument.connect().unwrap();
        sim.clear_wire();
        assert_eq!(
            instrument.note_on(NoteOn { note: 60, velocity: 90 }),
            Some(261.6)
        );
        assert_eq!(instrument.note_on(NoteOn { note: 62, velocity: 0 }), None);
        settle();
        assert_eq!(sim.commands(), vec!["FREQ 261.600000"]);
    }

    #[test]
    fn log_lines_arrive_on_the_message_loop() {
        let (instrument, _sim) = Instrument::simulated(config()).unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        instrument.set_log_sink(Some(Arc::new(move |line: &str| {
            sink.lock().push((line.to_string(), std::thread::current().id()));
        })));
        instrument.connect().unwrap();
        assert!(instrument.flush_callbacks());

        let lines = lines.lock();
        assert!(lines.iter().any(|(l, _)| l == "SYST:REM -> +0,\"No error\""));
        assert!(lines
            .iter()
            .all(|(_, id)| *id != std::thread::current().id()));
    }

    #[test]
    fn shutdown_disconnects_and_is_idempotent() {
        let (instrument, sim) = Instrument::simulated(config()).unwrap();
        instrument.connect().unwrap();
        let lfo = instrument.lfos().create().unwrap();
        lfo.set_enabled(true);
        instrument.arb().load_samples(0, vec![0.5; 64]).unwrap();

        instrument.shutdown();
        instrument.shutdown();
        assert!(!instrument.driver().is_connected());
        assert!(!sim.is_open());
        assert!(instrument.lfos().is_empty());
        assert_eq!(instrument.arb().slot_state(0).unwrap(), SlotState::Loaded);
        assert!(instrument.arb().upload_slot_async(0, |_, _, _| {}).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.arb.slot_names[2] = "SINC".into();
        assert!(Instrument::simulated(config).is_err());
    }

    #[test]
    fn status_line_format() {
        assert_eq!(note_status(69, 440.0), "MIDI On: 69 -> Freq: 440.000 Hz");
    }
}
