//! HP 33120A driver.
//!
//! [`Hp33120a`] owns the session and encodes the instrument's command set.
//! Every bus operation is serialized by a reentrant session lock, so public
//! methods may be composed (inside [`Hp33120a::transaction`] or internally)
//! without deadlocking.
//!
//! # Send disciplines
//!
//! - [`write`](Hp33120a::write): send, then read `SYST:ERR?`. Device errors are
//!   logged as `[DEVICE ERROR] <cmd> -> <resp>` and returned.
//! - [`write_fast`](Hp33120a::write_fast): send and flush only. Errors are
//!   picked up later by the command pipeline's periodic drain, so they surface
//!   delayed and unattributed to a specific command.
//! - [`query`](Hp33120a::query): send, read one line. Read failures and
//!   timeouts yield an empty string.

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use fgen_core::config::FgenConfig;
use fgen_core::{codes, FgenError, LogSink, Result};
use fgen_visa::{Transport, TransportError, DEFAULT_READ_LEN};

use crate::catalog::{self, Catalog};
use crate::scpi::{self, ErrorReply};
use crate::types::{AmSource, LiveTarget, ModShape, ModSource, TriggerSource, Waveform};

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable transport library.
    Unloaded,
    /// Library bound, never connected.
    Loaded,
    Connected,
    Disconnected,
}

/// Driver timing and logging options.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub timeout: Duration,
    pub upload_timeout: Duration,
    /// Pause after the ARB data block before the error queue is read.
    pub ingest_delay: Duration,
    /// Pause after `SYST:REM` / `*CLS` on connect.
    pub settle_after_connect: Duration,
    pub echo_checked_writes: bool,
    pub verbose: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            upload_timeout: Duration::from_secs(10),
            ingest_delay: Duration::from_millis(500),
            settle_after_connect: Duration::from_millis(50),
            echo_checked_writes: true,
            verbose: false,
        }
    }
}

impl DriverOptions {
    pub fn from_config(config: &FgenConfig) -> Self {
        Self {
            timeout: config.instrument.timeout(),
            upload_timeout: config.instrument.upload_timeout(),
            ingest_delay: config.arb.ingest_delay(),
            echo_checked_writes: config.instrument.echo_checked_writes,
            verbose: config.instrument.verbose,
            ..Default::default()
        }
    }
}

/// Last commanded base parameters.
///
/// Not read back from the instrument. Low-frequency modulators use these as
/// the reference their offsets are applied to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    pub frequency: f64,
    pub amplitude: f64,
    pub offset: f64,
    pub duty_cycle: f64,
    pub am_depth: f64,
    pub fm_deviation: f64,
    pub waveform: Waveform,
}

impl Default for Shadow {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            amplitude: 1.0,
            offset: 0.0,
            duty_cycle: 50.0,
            am_depth: 50.0,
            fm_deviation: 100.0,
            waveform: Waveform::Sine,
        }
    }
}

struct Session {
    transport: Box<dyn Transport>,
    resource: String,
}

/// HP/Agilent 33120A function / arbitrary waveform generator.
pub struct Hp33120a {
    session: ReentrantMutex<RefCell<Session>>,
    connected: AtomicBool,
    was_connected: AtomicBool,
    available: bool,
    last_error: Mutex<String>,
    shadow: Mutex<Shadow>,
    log_sink: RwLock<Option<LogSink>>,
    options: DriverOptions,
    /// Serializes ARB downloads without holding the session across steps.
    pub(crate) download_lock: Mutex<()>,
}

impl Hp33120a {
    pub fn new(transport: Box<dyn Transport>, options: DriverOptions) -> Self {
        let available = transport.is_available();
        Self {
            session: ReentrantMutex::new(RefCell::new(Session {
                transport,
                resource: String::new(),
            })),
            connected: AtomicBool::new(false),
            was_connected: AtomicBool::new(false),
            available,
            last_error: Mutex::new(String::new()),
            shadow: Mutex::new(Shadow::default()),
            log_sink: RwLock::new(None),
            options,
            download_lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    // ---------------------------------------------------------------------
    // Session primitives
    // ---------------------------------------------------------------------

    fn lock_session(&self) -> ReentrantMutexGuard<'_, RefCell<Session>> {
        self.session.lock()
    }

    /// Run `f` against the transport. The RefCell borrow lasts for `f` only,
    /// so `f` must not call back into the driver.
    fn with_transport<R>(&self, f: impl FnOnce(&mut dyn Transport) -> R) -> R {
        let guard = self.lock_session();
        let mut session = guard.borrow_mut();
        f(session.transport.as_mut())
    }

    /// Hold the session lock while `f` issues several commands.
    ///
    /// Nothing else reaches the bus until `f` returns.
    pub fn transaction<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _session = self.lock_session();
        f(self)
    }

    /// True while [`Hp33120a::download_arb`] runs.
    pub fn is_downloading(&self) -> bool {
        self.download_lock.is_locked()
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            self.set_last_error("Device not connected");
            Err(FgenError::NotConnected)
        }
    }

    /// Connection first, then the value, so a rejected input on a closed
    /// session still records why.
    pub(crate) fn finite(&self, what: &str, value: f64) -> Result<f64> {
        self.ensure_connected()?;
        scpi::check_finite(what, value).map_err(|err| self.rejected(err))
    }

    pub(crate) fn arb_name(&self, name: &str) -> Result<String> {
        self.ensure_connected()?;
        scpi::normalize_arb_name(name).map_err(|err| self.rejected(err))
    }

    fn rejected(&self, err: FgenError) -> FgenError {
        self.set_last_error(err.to_string());
        err
    }

    pub(crate) fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = message.into();
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Install (or clear) the log sink. The sink is called from worker
    /// threads; wrap it with [`fgen_core::marshal_sink`] to land on the UI thread.
    pub fn set_log_sink(&self, sink: Option<LogSink>) {
        *self.log_sink.write() = sink;
    }

    pub(crate) fn log(&self, line: &str) {
        let sink = self.log_sink.read().clone();
        if let Some(sink) = sink {
            sink(line);
        }
    }

    fn send(&self, command: &str) -> Result<()> {
        let _session = self.lock_session();
        self.ensure_connected()?;
        scpi::check_line(command).map_err(|err| self.rejected(err))?;
        debug!(command = %preview(command), "SCPI write");
        self.with_transport(|t| t.write_line(command))
            .map_err(|e| self.transport_failure(command, e))
    }

    fn receive(&self) -> std::result::Result<String, TransportError> {
        self.with_transport(|t| t.read_line(DEFAULT_READ_LEN))
    }

    fn transport_failure(&self, command: &str, err: TransportError) -> FgenError {
        self.set_last_error(format!("{}: {}", preview(command), err));
        err.into()
    }

    // ---------------------------------------------------------------------
    // Send disciplines
    // ---------------------------------------------------------------------

    /// Checked write: send `command`, then read the error queue.
    pub fn write(&self, command: &str) -> Result<()> {
        let _session = self.lock_session();
        self.send(command)?;
        self.send(scpi::SYST_ERR)?;
        match self.receive() {
            Ok(reply) if reply.is_empty() || scpi::is_no_error(&reply) => {
                if self.options.echo_checked_writes && !reply.is_empty() {
                    self.log(&format!("{} -> {}", command, reply));
                }
                Ok(())
            }
            Ok(reply) => Err(self.device_error(command, &reply)),
            Err(err) if err.is_timeout() => {
                if self.options.verbose {
                    self.log(&format!("{} -> [timeout reading error queue]", command));
                }
                Ok(())
            }
            Err(err) => Err(self.transport_failure(scpi::SYST_ERR, err)),
        }
    }

    /// Fire-and-forget write. Does not read the error queue.
    pub fn write_fast(&self, command: &str) -> Result<()> {
        self.send(command)
    }

    /// Write `command` and return the reply, trailing whitespace stripped.
    ///
    /// Any read failure yields `Ok("")`; a timeout is not logged.
    pub fn query(&self, command: &str) -> Result<String> {
        let _session = self.lock_session();
        self.send(command)?;
        match self.receive() {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_timeout() => Ok(String::new()),
            Err(err) => {
                self.set_last_error(format!("{}: {}", command, err));
                if self.options.verbose {
                    self.log(&format!("{} -> [read error: {}]", command, err));
                }
                Ok(String::new())
            }
        }
    }

    fn device_error(&self, command: &str, reply: &str) -> FgenError {
        let parsed = ErrorReply::parse(reply).unwrap_or(ErrorReply {
            code: -1,
            message: reply.to_string(),
        });
        self.set_last_error(reply);
        self.log(&format!("[DEVICE ERROR] {} -> {}", preview(command), reply));
        warn!(command = %preview(command), code = parsed.code, reply, "Device reported error");
        FgenError::Device {
            command: preview(command).to_string(),
            code: parsed.code,
            message: parsed.message,
        }
    }

    /// Read the error queue until it reports no error (at most `limit` entries).
    pub fn drain_errors(&self, limit: usize) -> Result<Vec<ErrorReply>> {
        let _session = self.lock_session();
        let mut errors = Vec::new();
        for _ in 0..limit {
            let reply = self.query(scpi::SYST_ERR)?;
            if reply.is_empty() || scpi::is_no_error(&reply) {
                break;
            }
            match ErrorReply::parse(&reply) {
                Some(err) if err.is_error() => errors.push(err),
                _ => break,
            }
        }
        Ok(errors)
    }

    /// Send an ARB data block with the session timeout raised to the upload
    /// timeout for the duration of the write.
    pub(crate) fn send_block(&self, block: &str) -> Result<()> {
        let _session = self.lock_session();
        self.ensure_connected()?;
        let (raised, normal) = (self.options.upload_timeout, self.options.timeout);
        debug!(bytes = block.len(), "Sending ARB data block");
        self.with_transport(|t| {
            if let Err(err) = t.set_timeout(raised) {
                warn!(error = %err, "Could not raise timeout for data block");
            }
            let sent = t.write_line(block);
            if let Err(err) = t.set_timeout(normal) {
                warn!(error = %err, "Could not restore session timeout");
            }
            sent
        })
        .map_err(|e| self.transport_failure(block, e))
    }

    // ---------------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else if !self.available {
            ConnectionState::Unloaded
        } else if self.was_connected.load(Ordering::Acquire) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Loaded
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn resource(&self) -> String {
        let guard = self.lock_session();
        let resource = guard.borrow().resource.clone();
        resource
    }

    /// Open `resource`, put the instrument in remote mode and clear status.
    ///
    /// An existing session is closed first.
    pub fn connect(&self, resource: &str) -> Result<()> {
        let _session = self.lock_session();
        self.set_last_error("");
        if self.is_connected() {
            self.disconnect();
        }

        if !self.available {
            self.set_last_error("VISA library not loaded.");
            return Err(FgenError::TransportNotAvailable(
                "VISA library not loaded".to_string(),
            ));
        }

        let timeout = self.options.timeout;
        if let Err(err) = self.with_transport(|t| t.connect(resource, timeout)) {
            self.set_last_error(format!("Failed to open device: {}", err));
            warn!(resource, error = %err, "Connect failed");
            return Err(err.into());
        }

        self.lock_session().borrow_mut().resource = resource.to_string();
        self.connected.store(true, Ordering::Release);
        self.was_connected.store(true, Ordering::Release);
        info!(resource, "Connected");

        for command in [scpi::REMOTE, scpi::CLEAR_STATUS] {
            if let Err(err) = self.write(command) {
                if err.is_transport() {
                    self.disconnect();
                    return Err(err);
                }
            }
        }
        std::thread::sleep(self.options.settle_after_connect);
        Ok(())
    }

    /// Return to local control and release the session. Idempotent.
    pub fn disconnect(&self) {
        let _session = self.lock_session();
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        self.with_transport(|t| {
            if t.is_open() {
                t.close();
            }
        });
        if was_connected {
            info!(resource = %self.resource(), "Disconnected");
        }
    }

    // ---------------------------------------------------------------------
    // Identification
    // ---------------------------------------------------------------------

    pub fn query_idn(&self) -> Result<String> {
        self.query(scpi::IDN)
    }

    pub fn query_error(&self) -> Result<String> {
        self.query(scpi::SYST_ERR)
    }

    // ---------------------------------------------------------------------
    // Shadow
    // ---------------------------------------------------------------------

    pub fn shadow(&self) -> Shadow {
        *self.shadow.lock()
    }

    fn update_shadow(&self, f: impl FnOnce(&mut Shadow)) {
        f(&mut self.shadow.lock());
    }

    // ---------------------------------------------------------------------
    // Carrier
    // ---------------------------------------------------------------------

    /// `APPL:<shape> <freq>, <amp>, <offset>` in one line.
    pub fn apply_waveform(
        &self,
        shape: Waveform,
        frequency: f64,
        amplitude: f64,
        offset: f64,
    ) -> Result<()> {
        self.finite("frequency", frequency)?;
        self.finite("amplitude", amplitude)?;
        self.finite("offset", offset)?;
        self.update_shadow(|s| {
            s.waveform = shape;
            s.frequency = frequency;
            s.amplitude = amplitude;
            s.offset = offset;
        });
        self.write(&format!(
            "APPL:{} {}, {}, {}",
            shape.scpi(),
            scpi::number(frequency),
            scpi::number(amplitude),
            scpi::number(offset)
        ))
    }

    pub fn set_waveform(&self, shape: Waveform) -> Result<()> {
        self.update_shadow(|s| s.waveform = shape);
        self.write(&format!("FUNCtion:SHAPe {}", shape.scpi()))
    }

    /// Select which arbitrary waveform `USER` plays. Does not switch the
    /// carrier shape.
    pub fn select_user_arb(&self, name: &str) -> Result<()> {
        let name = if name.eq_ignore_ascii_case(catalog::VOLATILE) {
            catalog::VOLATILE.to_string()
        } else {
            self.arb_name(name)?
        };
        self.write(&format!("FUNCtion:USER {}", name))
    }

    /// Select `name` and switch the carrier to it.
    pub fn use_user_arb(&self, name: &str) -> Result<()> {
        self.transaction(|d| {
            d.select_user_arb(name)?;
            d.set_waveform(Waveform::User)
        })
    }

    pub fn set_frequency(&self, hz: f64) -> Result<()> {
        let hz = self.finite("frequency", hz)?;
        self.update_shadow(|s| s.frequency = hz);
        self.write_fast(&scpi::scalar("FREQ", hz))
    }

    pub fn set_amplitude(&self, vpp: f64) -> Result<()> {
        let vpp = self.finite("amplitude", vpp)?;
        self.update_shadow(|s| s.amplitude = vpp);
        self.write_fast(&scpi::scalar("VOLT", vpp))
    }

    pub fn set_offset(&self, volts: f64) -> Result<()> {
        let volts = self.finite("offset", volts)?;
        self.update_shadow(|s| s.offset = volts);
        self.write_fast(&scpi::scalar("VOLT:OFFS", volts))
    }

    /// Phase in degrees; clamped to `[0, 359.999]`.
    pub fn set_phase(&self, degrees: f64) -> Result<()> {
        let degrees = clamp_phase(self.finite("phase", degrees)?);
        self.write_fast(&format!("PHAS {}", scpi::fixed(degrees, 3)))
    }

    pub fn set_duty_cycle(&self, percent: f64) -> Result<()> {
        let percent = self.finite("duty cycle", percent)?;
        self.update_shadow(|s| s.duty_cycle = percent);
        self.write_fast(&scpi::scalar("FUNC:SQU:DCYC", percent))
    }

    pub fn set_output_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("OUTP", enabled))
    }

    // ---------------------------------------------------------------------
    // AM
    // ---------------------------------------------------------------------

    pub fn set_am_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("AM:STAT", enabled))
    }

    pub fn set_am_depth(&self, percent: f64) -> Result<()> {
        let percent = self.finite("AM depth", percent)?;
        self.update_shadow(|s| s.am_depth = percent);
        self.write_fast(&scpi::scalar("AM:DEPT", percent))
    }

    pub fn set_am_source(&self, source: AmSource) -> Result<()> {
        self.write(&format!("AM:SOUR {}", source.scpi()))
    }

    pub fn set_am_internal_shape(&self, shape: ModShape) -> Result<()> {
        self.write(&format!("AM:INT:FUNC {}", shape.scpi()))
    }

    pub fn set_am_internal_frequency(&self, hz: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("AM:INT:FREQ", self.finite("AM rate", hz)?))
    }

    // ---------------------------------------------------------------------
    // FM
    // ---------------------------------------------------------------------

    pub fn set_fm_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("FM:STAT", enabled))
    }

    pub fn set_fm_deviation(&self, hz: f64) -> Result<()> {
        let hz = self.finite("FM deviation", hz)?;
        self.update_shadow(|s| s.fm_deviation = hz);
        self.write_fast(&scpi::scalar("FM:DEV", hz))
    }

    pub fn set_fm_source(&self, source: ModSource) -> Result<()> {
        self.write(&format!("FM:SOUR {}", source.scpi()))
    }

    pub fn set_fm_internal_shape(&self, shape: ModShape) -> Result<()> {
        self.write(&format!("FM:INT:FUNC {}", shape.scpi()))
    }

    pub fn set_fm_internal_frequency(&self, hz: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("FM:INT:FREQ", self.finite("FM rate", hz)?))
    }

    // ---------------------------------------------------------------------
    // FSK
    // ---------------------------------------------------------------------

    pub fn set_fsk_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("FSK:STAT", enabled))
    }

    /// Hop frequency.
    pub fn set_fsk_frequency(&self, hz: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("FSK:FREQ", self.finite("FSK hop", hz)?))
    }

    pub fn set_fsk_source(&self, source: ModSource) -> Result<()> {
        self.write(&format!("FSK:SOUR {}", source.scpi()))
    }

    pub fn set_fsk_internal_rate(&self, hz: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("FSK:INT:RATE", self.finite("FSK rate", hz)?))
    }

    // ---------------------------------------------------------------------
    // Sweep
    // ---------------------------------------------------------------------

    pub fn set_sweep_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("SWE:STAT", enabled))
    }

    pub fn set_sweep_start(&self, hz: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("FREQ:STAR", self.finite("sweep start", hz)?))
    }

    pub fn set_sweep_stop(&self, hz: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("FREQ:STOP", self.finite("sweep stop", hz)?))
    }

    pub fn set_sweep_time(&self, seconds: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("SWE:TIME", self.finite("sweep time", seconds)?))
    }

    // ---------------------------------------------------------------------
    // Burst
    // ---------------------------------------------------------------------

    pub fn set_burst_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("BM:STAT", enabled))
    }

    pub fn set_burst_cycles(&self, cycles: u32) -> Result<()> {
        self.write_fast(&format!("BM:NCYC {}", cycles))
    }

    pub fn set_burst_phase(&self, degrees: f64) -> Result<()> {
        self.write_fast(&scpi::scalar("BM:PHAS", self.finite("burst phase", degrees)?))
    }

    /// The instrument takes a burst rate, not a period.
    pub fn set_burst_internal_period(&self, seconds: f64) -> Result<()> {
        let seconds = self.finite("burst period", seconds)?;
        if seconds <= 0.0 {
            self.set_last_error("burst period must be positive");
            return Err(FgenError::InvalidParameter(format!(
                "burst period must be positive, got {}",
                seconds
            )));
        }
        self.write_fast(&scpi::scalar("BM:INT:RATE", 1.0 / seconds))
    }

    pub fn set_burst_source(&self, source: ModSource) -> Result<()> {
        self.write(&format!("BM:SOUR {}", source.scpi()))
    }

    // ---------------------------------------------------------------------
    // Sync / trigger
    // ---------------------------------------------------------------------

    pub fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        self.write(&scpi::on_off("OUTP:SYNC", enabled))
    }

    pub fn set_trigger_source(&self, source: TriggerSource) -> Result<()> {
        self.write(&format!("TRIG:SOUR {}", source.scpi()))
    }

    // ---------------------------------------------------------------------
    // Live updates
    // ---------------------------------------------------------------------

    /// Fast write of a modulated value. Leaves the shadow untouched so it
    /// stays the modulation reference.
    pub fn update_live(&self, target: LiveTarget, value: f64) -> Result<()> {
        let value = self.finite("live value", value)?;
        let header = match target {
            LiveTarget::Frequency => "FREQ",
            LiveTarget::Amplitude => "VOLT",
            LiveTarget::DutyCycle => "FUNC:SQU:DCYC",
            LiveTarget::AmDepth => "AM:DEPT",
            LiveTarget::FmDeviation => "FM:DEV",
        };
        self.write_fast(&scpi::scalar(header, value))
    }

    // ---------------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------------

    /// Every resident waveform name (`DATA:CATalog?`).
    pub fn catalog_names(&self) -> Result<Vec<String>> {
        Ok(scpi::parse_catalog(&self.query(scpi::CATALOG_ALL)?))
    }

    /// Non-volatile catalog (`DATA:NVOLatile:CATalog?`).
    pub fn nonvolatile_catalog(&self) -> Result<Vec<String>> {
        Ok(scpi::parse_catalog(&self.query(scpi::CATALOG_NVOL)?))
    }

    /// Free non-volatile slots; `None` if the reply is unparseable.
    pub fn free_slots(&self) -> Result<Option<usize>> {
        Ok(scpi::parse_count(&self.query(scpi::NVOL_FREE)?))
    }

    pub fn waveform_catalog(&self) -> Result<Catalog> {
        Ok(Catalog::from_names(self.catalog_names()?))
    }

    pub fn user_arb_names(&self) -> Result<Vec<String>> {
        Ok(Catalog::from_names(self.nonvolatile_catalog()?).user)
    }

    /// Delete a user ARB from non-volatile memory.
    ///
    /// If the waveform is active (+787) the carrier is switched to `SIN` and
    /// the delete retried once.
    pub fn delete_arb(&self, name: &str) -> Result<()> {
        let name = self.arb_name(name)?;
        if catalog::is_reserved(&name) {
            self.set_last_error(format!("{} cannot be deleted", name));
            return Err(FgenError::InvalidParameter(format!(
                "{} is reserved and cannot be deleted",
                name
            )));
        }
        let command = format!("DATA:DELete {}", name);
        self.transaction(|d| match d.write(&command) {
            Err(FgenError::Device { code, .. }) if code == codes::ACTIVE => {
                d.set_waveform(Waveform::Sine)?;
                d.write(&command)
            }
            other => other,
        })
    }
}

impl Drop for Hp33120a {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Clamp phase to `[0, 360)`: anything at or above 360 becomes 359.999.
pub fn clamp_phase(degrees: f64) -> f64 {
    if degrees >= 360.0 {
        359.999
    } else {
        degrees.max(0.0)
    }
}

/// Data blocks are far too long for a log line.
fn preview(command: &str) -> &str {
    const MAX: usize = 64;
    if command.len() <= MAX {
        command
    } else {
        let mut end = MAX;
        while !command.is_char_boundary(end) {
            end -= 1;
        }
        &command[..end]
    }
}
