//! Low-frequency modulators.
//!
//! Each [`LfoEngine`] ticks every 50 ms on its own thread and pushes a
//! modulated value with [`Hp33120a::update_live`]. The driver's shadow is the
//! reference the offset is applied to; live writes leave it untouched, so
//! the modulation never drifts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use fgen_core::{Event, Result, WorkerHandle};

use crate::driver::{Hp33120a, Shadow};
use crate::types::{LfoShape, LiveTarget};

/// Update period.
pub const LFO_TICK: Duration = Duration::from_millis(50);

const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoSettings {
    pub enabled: bool,
    pub shape: LfoShape,
    pub rate_hz: f64,
    /// Relative depth; the raw shape value in `[-1, 1]` is multiplied by it.
    pub depth: f64,
    pub target: LiveTarget,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            shape: LfoShape::Sine,
            rate_hz: 1.0,
            depth: 0.1,
            target: LiveTarget::Frequency,
        }
    }
}

/// Shape value in `[-1, 1]` at `phase` radians.
pub fn shape_value(shape: LfoShape, phase: f64) -> f64 {
    let frac = (phase / TAU).rem_euclid(1.0);
    match shape {
        LfoShape::Sine => phase.sin(),
        LfoShape::Triangle => {
            if frac < 0.25 {
                frac * 4.0
            } else if frac < 0.75 {
                2.0 - frac * 4.0
            } else {
                frac * 4.0 - 4.0
            }
        }
        LfoShape::Square => {
            if phase.sin() >= 0.0 {
                1.0
            } else {
                -1.0
            }
        }
        LfoShape::Ramp => frac * 2.0 - 1.0,
    }
}

/// Apply `offset` (shape value times depth) to the shadow value of `target`.
///
/// Frequency and amplitude scale relatively; duty, AM depth and FM deviation
/// move by a fixed span (20 %, 30 %, 500 Hz) per unit offset.
pub fn modulated_value(target: LiveTarget, shadow: &Shadow, offset: f64) -> f64 {
    match target {
        LiveTarget::Frequency => shadow.frequency * (1.0 + offset),
        LiveTarget::Amplitude => shadow.amplitude * (1.0 + offset),
        LiveTarget::DutyCycle => shadow.duty_cycle + offset * 20.0,
        LiveTarget::AmDepth => shadow.am_depth + offset * 30.0,
        LiveTarget::FmDeviation => shadow.fm_deviation + offset * 500.0,
    }
}

/// Phase accumulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Oscillator {
    phase: f64,
}

impl Oscillator {
    /// Advance by `dt` seconds and return the scaled offset.
    pub fn tick(&mut self, settings: &LfoSettings, dt: f64) -> f64 {
        self.phase = (self.phase + TAU * settings.rate_hz * dt).rem_euclid(TAU);
        shape_value(settings.shape, self.phase) * settings.depth
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }
}

/// One modulator thread.
pub struct LfoEngine {
    id: u64,
    settings: Arc<Mutex<LfoSettings>>,
    stop: Arc<AtomicBool>,
    wake: Arc<Event>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl LfoEngine {
    pub fn start(id: u64, driver: Arc<Hp33120a>, tick: Duration) -> Result<Self> {
        let settings = Arc::new(Mutex::new(LfoSettings::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Event::new());

        let worker = {
            let settings = settings.clone();
            let stop = stop.clone();
            let wake = wake.clone();
            WorkerHandle::spawn(&format!("fgen-lfo-{}", id), move || {
                let mut osc = Oscillator::default();
                let dt = tick.as_secs_f64();
                while !stop.load(Ordering::Acquire) {
                    wake.wait_timeout(tick);
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let current = *settings.lock();
                    if !current.enabled || !driver.is_connected() {
                        continue;
                    }
                    let offset = osc.tick(&current, dt);
                    let value = modulated_value(current.target, &driver.shadow(), offset);
                    if let Err(err) = driver.update_live(current.target, value) {
                        debug!(lfo = id, error = %err, "LFO update failed");
                    }
                }
            })?
        };

        Ok(Self {
            id,
            settings,
            stop,
            wake,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn settings(&self) -> LfoSettings {
        *self.settings.lock()
    }

    pub fn update(&self, settings: LfoSettings) {
        *self.settings.lock() = settings;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.lock().enabled = enabled;
    }

    pub fn set_shape(&self, shape: LfoShape) {
        self.settings.lock().shape = shape;
    }

    pub fn set_rate(&self, rate_hz: f64) {
        self.settings.lock().rate_hz = rate_hz;
    }

    pub fn set_depth(&self, depth: f64) {
        self.settings.lock().depth = depth;
    }

    pub fn set_target(&self, target: LiveTarget) {
        self.settings.lock().target = target;
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.signal();
        if let Some(worker) = self.worker.lock().take() {
            if !worker.join_timeout(STOP_TIMEOUT) {
                warn!(lfo = self.id, "LFO thread did not stop in time");
            }
        }
    }
}

impl Drop for LfoEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns every LFO of one instrument.
pub struct LfoBank {
    driver: Arc<Hp33120a>,
    tick: Duration,
    next_id: AtomicU64,
    engines: Mutex<Vec<Arc<LfoEngine>>>,
}

impl LfoBank {
    pub fn new(driver: Arc<Hp33120a>) -> Self {
        Self::with_tick(driver, LFO_TICK)
    }

    pub fn with_tick(driver: Arc<Hp33120a>, tick: Duration) -> Self {
        Self {
            driver,
            tick,
            next_id: AtomicU64::new(1),
            engines: Mutex::new(Vec::new()),
        }
    }

    pub fn create(&self) -> Result<Arc<LfoEngine>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::new(LfoEngine::start(id, self.driver.clone(), self.tick)?);
        self.engines.lock().push(engine.clone());
        Ok(engine)
    }

    /// Stop and forget LFO `id`. Returns false if no such LFO exists.
    pub fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut engines = self.engines.lock();
            engines
                .iter()
                .position(|e| e.id() == id)
                .map(|pos| engines.remove(pos))
        };
        match removed {
            Some(engine) => {
                engine.stop();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<LfoEngine>> {
        self.engines.lock().iter().find(|e| e.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        let engines: Vec<_> = self.engines.lock().drain(..).collect();
        for engine in engines {
            engine.stop();
        }
    }
}

impl Drop for LfoBank {
    fn drop(&mut self) {
        self.shutdown();
    }
}
