//! ARB pipeline: four waveform slots and a background upload worker.
//!
//! Each slot keeps the original mono audio and a target point count, so a
//! point-count change can re-resample from the source rather than from a
//! previous rendering. Uploads run either synchronously
//! ([`ArbManager::upload_slot`]) or on the worker
//! ([`ArbManager::upload_slot_async`]); completion callbacks are always
//! delivered through the [`Dispatcher`].
//!
//! Per-slot state machine:
//!
//! ```text
//! Empty -> Loaded -> Uploading -> Uploaded
//!                        ^            |
//!                        +------------+  point count changed
//! any   -> Loaded                        new audio loaded, renamed
//! ```
//!
//! Any edit bumps the slot's generation. An upload that finishes on a stale
//! generation never marks the slot uploaded; if the edit was a point-count
//! change, a follow-up upload at the new count is queued instead.

pub mod audio;
pub mod resample;
pub mod upload;

pub use upload::{ArbOutcome, StoredAs, VOLATILE_NOTICE};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use fgen_core::config::{ArbConfig, MAX_ARB_POINTS, MIN_ARB_POINTS};
use fgen_core::{Dispatcher, Event, FgenError, Result, WorkerHandle};

use crate::catalog;
use crate::driver::Hp33120a;
use crate::scpi;

/// Number of ARB slots.
pub const SLOT_COUNT: usize = 4;

const WORKER_POLL: Duration = Duration::from_millis(100);

/// Per-task completion callback: `(slot, success, message)`.
pub type UploadCallback = Box<dyn FnOnce(usize, bool, String) + Send + 'static>;

/// Observer notified after every async upload, including re-uploads
/// triggered by a point-count change.
pub type CompletionListener = Arc<dyn Fn(usize, bool, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Empty,
    Loaded,
    Uploading,
    Uploaded,
}

/// Snapshot of one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotInfo {
    pub index: usize,
    pub name: String,
    pub state: SlotState,
    pub target_points: usize,
    pub sample_count: usize,
}

#[derive(Debug)]
struct SlotData {
    name: String,
    samples: Arc<Vec<f32>>,
    target_points: usize,
    has_data: bool,
    uploaded: bool,
    uploading: bool,
    /// Point count changed while uploading.
    follow_up: bool,
    /// Bumped on every edit so a finishing upload can tell it is stale.
    generation: u64,
}

impl SlotData {
    fn new(name: String, target_points: usize) -> Self {
        Self {
            name,
            samples: Arc::new(Vec::new()),
            target_points,
            has_data: false,
            uploaded: false,
            uploading: false,
            follow_up: false,
            generation: 0,
        }
    }

    fn state(&self) -> SlotState {
        if self.uploading {
            SlotState::Uploading
        } else if self.uploaded {
            SlotState::Uploaded
        } else if self.has_data {
            SlotState::Loaded
        } else {
            SlotState::Empty
        }
    }
}

struct Task {
    slot: usize,
    generation: u64,
    callback: Option<UploadCallback>,
}

struct Shared {
    driver: Arc<Hp33120a>,
    slots: Vec<Mutex<SlotData>>,
    queue: Mutex<VecDeque<Task>>,
    wake: Event,
    shutdown: AtomicBool,
    dispatcher: Arc<dyn Dispatcher>,
    listener: RwLock<Option<CompletionListener>>,
}

/// Four ARB slots plus the upload worker.
pub struct ArbManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
    shutdown_timeout: Duration,
}

impl ArbManager {
    /// Create the manager and start its worker.
    pub fn new(
        driver: Arc<Hp33120a>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &ArbConfig,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(SLOT_COUNT);
        for i in 0..SLOT_COUNT {
            let name = match config.slot_names.get(i) {
                Some(name) => valid_slot_name(name)
                    .map_err(|e| FgenError::Config(format!("arb.slot_names[{}]: {}", i, e)))?,
                None => format!("ARB_{}", i + 1),
            };
            slots.push(Mutex::new(SlotData::new(name, config.default_points)));
        }

        let shared = Arc::new(Shared {
            driver,
            slots,
            queue: Mutex::new(VecDeque::new()),
            wake: Event::new(),
            shutdown: AtomicBool::new(false),
            dispatcher,
            listener: RwLock::new(None),
        });

        let worker_shared = shared.clone();
        let worker = WorkerHandle::spawn("fgen-arb-upload", move || worker_shared.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    pub fn set_completion_listener(&self, listener: Option<CompletionListener>) {
        *self.shared.listener.write() = listener;
    }

    fn slot(&self, index: usize) -> Result<&Mutex<SlotData>> {
        self.shared
            .slots
            .get(index)
            .ok_or(FgenError::InvalidSlot(index))
    }

    // ---------------------------------------------------------------------
    // Slot data
    // ---------------------------------------------------------------------

    /// Store mono samples in `slot`. Clears the uploaded flag.
    pub fn load_samples(&self, slot: usize, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Err(FgenError::InvalidParameter("no samples".into()));
        }
        let mut data = self.slot(slot)?.lock();
        debug!(slot, samples = samples.len(), "Slot loaded");
        data.samples = Arc::new(samples);
        data.has_data = true;
        data.uploaded = false;
        data.follow_up = false;
        data.generation += 1;
        Ok(())
    }

    /// Decode a WAV file into `slot`.
    pub fn load_audio_file(&self, slot: usize, path: &Path) -> Result<()> {
        self.slot(slot)?;
        let samples = audio::load_wav_mono(path)?;
        info!(slot, path = %path.display(), samples = samples.len(), "Loaded audio file");
        self.load_samples(slot, samples)
    }

    /// Rename `slot`. The name is uppercased and must be a valid,
    /// non-reserved ARB name.
    pub fn set_slot_name(&self, slot: usize, name: &str) -> Result<()> {
        let name = valid_slot_name(name)?;
        let mut data = self.slot(slot)?.lock();
        if data.name != name {
            data.name = name;
            data.uploaded = false;
            data.follow_up = false;
            data.generation += 1;
        }
        Ok(())
    }

    /// Change the target point count. An uploaded slot is re-uploaded; a slot
    /// mid-upload is uploaded again once the current transfer finishes.
    pub fn set_point_count(&self, slot: usize, points: usize) -> Result<()> {
        if !(MIN_ARB_POINTS..=MAX_ARB_POINTS).contains(&points) {
            return Err(FgenError::InvalidParameter(format!(
                "point count {} outside {}..={}",
                points, MIN_ARB_POINTS, MAX_ARB_POINTS
            )));
        }
        let reupload = {
            let mut data = self.slot(slot)?.lock();
            if data.target_points == points {
                return Ok(());
            }
            data.target_points = points;
            data.generation += 1;
            if data.uploading {
                data.follow_up = true;
                false
            } else {
                data.uploaded && data.has_data
            }
        };
        if reupload {
            info!(slot, points, "Point count changed; re-uploading");
            self.enqueue(slot, None)?;
        }
        Ok(())
    }

    pub fn slot_state(&self, slot: usize) -> Result<SlotState> {
        Ok(self.slot(slot)?.lock().state())
    }

    pub fn is_uploading(&self, slot: usize) -> bool {
        self.slot(slot).map(|s| s.lock().uploading).unwrap_or(false)
    }

    pub fn slot_info(&self, slot: usize) -> Result<SlotInfo> {
        let data = self.slot(slot)?.lock();
        Ok(SlotInfo {
            index: slot,
            name: data.name.clone(),
            state: data.state(),
            target_points: data.target_points,
            sample_count: data.samples.len(),
        })
    }

    pub fn slots(&self) -> Vec<SlotInfo> {
        (0..SLOT_COUNT).filter_map(|i| self.slot_info(i).ok()).collect()
    }

    /// Mark each slot uploaded iff its name is resident in non-volatile
    /// memory.
    pub fn sync_from_device(&self) -> Result<()> {
        let resident = self.shared.driver.user_arb_names()?;
        for (index, slot) in self.shared.slots.iter().enumerate() {
            let mut data = slot.lock();
            if data.uploading {
                continue;
            }
            data.uploaded = data.has_data && resident.iter().any(|n| *n == data.name);
            debug!(slot = index, name = %data.name, uploaded = data.uploaded, "Synced from device");
        }
        Ok(())
    }

    /// Delete a user ARB from the device, clearing the uploaded flag of any
    /// slot that held it.
    pub fn delete_from_device(&self, name: &str) -> Result<()> {
        self.shared.driver.delete_arb(name)?;
        let name = name.to_ascii_uppercase();
        for slot in &self.shared.slots {
            let mut data = slot.lock();
            if data.name == name {
                data.uploaded = false;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Uploads
    // ---------------------------------------------------------------------

    /// Resample and upload `slot` on the calling thread.
    pub fn upload_slot(&self, slot: usize) -> Result<ArbOutcome> {
        let generation = self.shared.begin(slot)?;
        let result = catch_unwind(AssertUnwindSafe(|| self.shared.perform(slot)))
            .unwrap_or_else(|_| Err(FgenError::Worker("upload panicked".into())));
        if let Some(next) = self.shared.finish(slot, generation, result.is_ok()) {
            self.shared.push(slot, next, None);
        }
        result
    }

    /// Queue `slot` for upload on the worker. `callback` is dispatched with
    /// `(slot, success, message)` when the upload finishes, or immediately if
    /// the request is rejected.
    pub fn upload_slot_async<F>(&self, slot: usize, callback: F) -> Result<()>
    where
        F: FnOnce(usize, bool, String) + Send + 'static,
    {
        self.enqueue(slot, Some(Box::new(callback)))
    }

    fn enqueue(&self, slot: usize, callback: Option<UploadCallback>) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            let err = FgenError::Worker("ARB upload worker stopped".into());
            self.shared.notify(slot, false, err.to_string(), callback);
            return Err(err);
        }
        let generation = match self.shared.begin(slot) {
            Ok(generation) => generation,
            Err(err) => {
                self.shared.notify(slot, false, describe(&err), callback);
                return Err(err);
            }
        };
        self.shared.push(slot, generation, callback);
        Ok(())
    }

    /// Stop the worker. Queued uploads complete with a failure.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.signal();
        if let Some(worker) = self.worker.lock().take() {
            if !worker.join_timeout(self.shutdown_timeout) {
                warn!("ARB upload worker did not stop in time");
            }
        }
    }
}

impl Drop for ArbManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run(&self) {
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) if self.shutdown.load(Ordering::Acquire) => {
                    self.finish(task.slot, task.generation, false);
                    self.notify(task.slot, false, "ARB upload worker stopped".into(), task.callback);
                }
                Some(task) => self.process(task),
                None if self.shutdown.load(Ordering::Acquire) => break,
                None => {
                    self.wake.wait_timeout(WORKER_POLL);
                }
            }
        }
    }

    fn process(&self, task: Task) {
        let Task {
            slot,
            generation,
            callback,
        } = task;
        let result = catch_unwind(AssertUnwindSafe(|| self.perform(slot)));
        let (success, message) = match result {
            Ok(Ok(outcome)) => (true, outcome.message()),
            Ok(Err(err)) => {
                warn!(slot, error = %err, "ARB upload failed");
                (false, describe(&err))
            }
            Err(_) => {
                error!(slot, "ARB upload panicked");
                (false, "Upload failed: unexpected error".to_string())
            }
        };
        let next = self.finish(slot, generation, success);
        self.notify(slot, success, message, callback);
        if let Some(next) = next {
            info!(slot, "Point count changed during upload; uploading again");
            self.push(slot, next, None);
        }
    }

    fn push(&self, slot: usize, generation: u64, callback: Option<UploadCallback>) {
        self.queue.lock().push_back(Task {
            slot,
            generation,
            callback,
        });
        self.wake.signal();
    }

    /// Validate and mark `slot` uploading. Returns the data generation.
    fn begin(&self, slot: usize) -> Result<u64> {
        let mut data = self.slots.get(slot).ok_or(FgenError::InvalidSlot(slot))?.lock();
        if !data.has_data {
            return Err(FgenError::NoData(slot));
        }
        if data.uploading {
            return Err(FgenError::UploadInProgress(slot));
        }
        data.uploading = true;
        Ok(data.generation)
    }

    fn perform(&self, slot: usize) -> Result<ArbOutcome> {
        if !self.driver.is_connected() {
            return Err(FgenError::NotConnected);
        }
        let (name, samples, points) = {
            let data = self.slots.get(slot).ok_or(FgenError::InvalidSlot(slot))?.lock();
            (data.name.clone(), data.samples.clone(), data.target_points)
        };

        let resampled = resample::resample(&samples, points);
        std::thread::yield_now();
        if resampled.is_empty() {
            return Err(FgenError::ResampleEmpty);
        }
        let outcome = self.driver.download_arb(&name, &resampled, points);
        std::thread::yield_now();
        outcome
    }

    /// Release `slot` after an upload. Returns the generation of a follow-up
    /// upload, already marked uploading, when one is due.
    fn finish(&self, slot: usize, generation: u64, success: bool) -> Option<u64> {
        let mut data = self.slots.get(slot)?.lock();
        data.uploading = false;
        if data.generation == generation {
            data.uploaded = success;
            return None;
        }

        // The device holds data for an older edit
        data.uploaded = false;
        let follow_up = std::mem::take(&mut data.follow_up);
        if follow_up && success && data.has_data && !self.shutdown.load(Ordering::Acquire) {
            data.uploading = true;
            Some(data.generation)
        } else {
            None
        }
    }

    fn notify(&self, slot: usize, success: bool, message: String, callback: Option<UploadCallback>) {
        let listener = self.listener.read().clone();
        if callback.is_none() && listener.is_none() {
            return;
        }
        self.dispatcher.dispatch(Box::new(move || {
            if let Some(listener) = listener {
                listener(slot, success, &message);
            }
            if let Some(callback) = callback {
                callback(slot, success, message);
            }
        }));
    }
}

fn valid_slot_name(name: &str) -> Result<String> {
    let name = scpi::normalize_arb_name(name)?;
    if catalog::is_reserved(&name) {
        return Err(FgenError::InvalidParameter(format!(
            "{} is a reserved waveform name",
            name
        )));
    }
    Ok(name)
}

/// Completion message for a failed upload.
fn describe(err: &FgenError) -> String {
    match err {
        FgenError::InvalidSlot(_) => "Invalid slot index".to_string(),
        FgenError::NoData(_) => "No data in slot".to_string(),
        FgenError::UploadInProgress(_) => "Upload already in progress".to_string(),
        other => other.to_string(),
    }
}
