//! In-process simulation of a 33120A behind the [`Transport`] seam.
//!
//! Models the pieces of the instrument the core depends on: the error queue,
//! the volatile staging buffer, four non-volatile ARB slots and the catalog
//! queries. Every line written is recorded so tests can assert on the wire
//! trace. Clones share state, so a test keeps one handle while the driver
//! owns another.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fgen_core::codes;
use fgen_visa::{Transport, TransportError};

use crate::catalog::{self, USER_SLOTS};

pub const SIM_IDN: &str = "HEWLETT-PACKARD,33120A,0,7.0-5.0-1.0";

#[derive(Debug, Default)]
struct GateState {
    reached: bool,
    released: bool,
}

/// Blocks the simulated bus when a matching command arrives.
#[derive(Debug, Clone)]
pub struct PauseHandle {
    prefix: String,
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl PauseHandle {
    /// Wait until the gated command has been written.
    pub fn wait_reached(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock();
        while !state.reached {
            if cvar.wait_until(&mut state, deadline).timed_out() {
                return state.reached;
            }
        }
        true
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().released = true;
        cvar.notify_all();
    }

    fn block(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        state.reached = true;
        cvar.notify_all();
        while !state.released {
            cvar.wait(&mut state);
        }
    }
}

#[derive(Debug)]
struct SimState {
    available: bool,
    open: bool,
    fail_open: bool,
    responsive: bool,
    io_failure: bool,
    timeout: Duration,
    timeouts: Vec<Duration>,
    resource: String,

    wire: Vec<String>,
    replies: VecDeque<String>,
    errors: VecDeque<(i32, String)>,
    values: HashMap<String, String>,

    shape: String,
    selected_arb: String,
    volatile_points: Option<usize>,
    builtins: bool,
    user_arbs: Vec<String>,
    copy_failures: VecDeque<i32>,
    ingest_failures: VecDeque<i32>,
    free_override: Option<String>,
    pause: Option<PauseHandle>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            available: true,
            open: false,
            fail_open: false,
            responsive: true,
            io_failure: false,
            timeout: Duration::from_millis(500),
            timeouts: Vec::new(),
            resource: String::new(),
            wire: Vec::new(),
            replies: VecDeque::new(),
            errors: VecDeque::new(),
            values: HashMap::new(),
            shape: "SIN".to_string(),
            selected_arb: "EXP_RISE".to_string(),
            volatile_points: None,
            builtins: false,
            user_arbs: Vec::new(),
            copy_failures: VecDeque::new(),
            ingest_failures: VecDeque::new(),
            free_override: None,
            pause: None,
        }
    }
}

fn error_text(code: i32) -> &'static str {
    match code {
        codes::VOLATILE_NOT_LOADED => "Arb waveform data not loaded into VOLATILE memory",
        codes::MEMORY_FULL => "Not enough memory to store new arb waveform; use DATA:DELETE",
        codes::NAME_CONFLICT => "Cannot overwrite a built-in waveform",
        codes::NAME_RESERVED => "Unknown arb waveform name",
        codes::NOT_FOUND => "Specified arb waveform does not exist",
        codes::CANNOT_DELETE => "Not able to delete a built-in arb waveform",
        codes::ACTIVE => "Not able to delete the currently selected active arb waveform",
        -222 => "Data out of range",
        -113 => "Undefined header",
        _ => "Device-specific error",
    }
}

fn quote_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = names.map(|n| format!("\"{}\"", n)).collect();
    if quoted.is_empty() {
        "\"\"".to_string()
    } else {
        quoted.join(",")
    }
}

impl SimState {
    fn push_error(&mut self, code: i32) {
        self.errors.push_back((code, error_text(code).to_string()));
    }

    fn reply(&mut self, text: impl Into<String>) {
        self.replies.push_back(text.into());
    }

    fn free_slots(&self) -> usize {
        USER_SLOTS.saturating_sub(self.user_arbs.len())
    }

    fn builtin_names(&self) -> &'static [&'static str] {
        if self.builtins {
            &catalog::BUILTIN_ARBS
        } else {
            &[]
        }
    }

    fn nonvolatile_names(&self) -> Vec<&str> {
        self.builtin_names()
            .iter()
            .copied()
            .chain(self.user_arbs.iter().map(String::as_str))
            .collect()
    }

    fn handle(&mut self, line: &str) {
        let upper = line.to_ascii_uppercase();
        match upper.as_str() {
            "SYST:ERR?" => {
                let reply = match self.errors.pop_front() {
                    Some((code, text)) => format!("{:+},\"{}\"", code, text),
                    None => "+0,\"No error\"".to_string(),
                };
                self.reply(reply);
                return;
            }
            "*IDN?" => {
                self.reply(SIM_IDN);
                return;
            }
            "*CLS" => {
                self.errors.clear();
                return;
            }
            "SYST:REM" | "SYST:LOC" => return,
            "DATA:CATALOG?" => {
                let mut names = self.nonvolatile_names();
                if self.volatile_points.is_some() {
                    names.insert(0, catalog::VOLATILE);
                }
                let reply = quote_list(names.into_iter());
                self.reply(reply);
                return;
            }
            "DATA:NVOLATILE:CATALOG?" => {
                let reply = quote_list(self.nonvolatile_names().into_iter());
                self.reply(reply);
                return;
            }
            "DATA:NVOLATILE:FREE?" => {
                let reply = self
                    .free_override
                    .clone()
                    .unwrap_or_else(|| self.free_slots().to_string());
                self.reply(reply);
                return;
            }
            _ => {}
        }

        if let Some(data) = upper.strip_prefix("DATA VOLATILE,") {
            self.ingest(data);
        } else if let Some(args) = upper.strip_prefix("DATA:COPY ") {
            self.copy(args);
        } else if let Some(name) = upper.strip_prefix("DATA:DELETE ") {
            self.delete(name.trim());
        } else if let Some(name) = upper.strip_prefix("FUNCTION:USER ") {
            self.select_user(name.trim());
        } else if let Some(shape) = upper.strip_prefix("FUNCTION:SHAPE ") {
            self.shape = shape.trim().to_string();
        } else if let Some(rest) = upper.strip_prefix("APPL:") {
            let shape = rest.split_whitespace().next().unwrap_or_default();
            self.shape = shape.to_string();
        } else if upper.ends_with('?') {
            self.push_error(-113);
        } else if let Some((header, value)) = line.split_once(' ') {
            self.values.insert(header.to_string(), value.to_string());
        } else {
            self.push_error(-113);
        }
    }

    fn ingest(&mut self, data: &str) {
        if let Some(code) = self.ingest_failures.pop_front() {
            self.push_error(code);
            return;
        }
        let mut points = 0usize;
        for token in data.split(',') {
            match token.trim().parse::<f64>() {
                Ok(v) if (-1.0..=1.0).contains(&v) => points += 1,
                _ => {
                    self.push_error(-222);
                    return;
                }
            }
        }
        if !(8..=16_000).contains(&points) {
            self.push_error(-222);
            return;
        }
        self.volatile_points = Some(points);
    }

    fn copy(&mut self, args: &str) {
        let Some((name, source)) = args.split_once(',') else {
            self.push_error(-113);
            return;
        };
        let name = name.trim().to_string();
        if source.trim() != catalog::VOLATILE {
            self.push_error(-113);
            return;
        }
        if let Some(code) = self.copy_failures.pop_front() {
            self.push_error(code);
            return;
        }
        if self.volatile_points.is_none() {
            self.push_error(codes::VOLATILE_NOT_LOADED);
        } else if catalog::is_reserved(&name) {
            self.push_error(codes::NAME_RESERVED);
        } else if self.user_arbs.contains(&name) {
            // Overwrite in place
        } else if self.free_slots() == 0 {
            self.push_error(codes::MEMORY_FULL);
        } else {
            self.user_arbs.push(name);
        }
    }

    fn delete(&mut self, name: &str) {
        if catalog::is_builtin(name) || name == catalog::VOLATILE {
            self.push_error(codes::CANNOT_DELETE);
        } else if self.shape == "USER" && self.selected_arb == name {
            self.push_error(codes::ACTIVE);
        } else if let Some(pos) = self.user_arbs.iter().position(|n| n == name) {
            self.user_arbs.remove(pos);
        } else {
            self.push_error(codes::NOT_FOUND);
        }
    }

    fn select_user(&mut self, name: &str) {
        let known = if name == catalog::VOLATILE {
            self.volatile_points.is_some()
        } else {
            catalog::is_builtin(name) || self.user_arbs.iter().any(|n| n == name)
        };
        if known {
            self.selected_arb = name.to_string();
        } else {
            self.push_error(codes::NOT_FOUND);
        }
    }
}

/// Simulated instrument; see the module docs.
#[derive(Debug, Clone, Default)]
pub struct SimulatedInstrument {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a host without a VISA install.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// When false, every read times out.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().responsive = responsive;
    }

    /// When true, every write and read fails with an I/O error.
    pub fn set_io_failure(&self, fail: bool) {
        self.state.lock().io_failure = fail;
    }

    /// Seed the factory ARBs into the catalogs.
    pub fn seed_builtins(&self) {
        self.state.lock().builtins = true;
    }

    pub fn seed_user_arbs(&self, names: &[&str]) {
        let mut state = self.state.lock();
        for name in names {
            let name = name.to_ascii_uppercase();
            if !state.user_arbs.contains(&name) {
                state.user_arbs.push(name);
            }
        }
    }

    /// Force the next `count` copies to fail with `code`.
    pub fn fail_copies(&self, code: i32, count: usize) {
        let mut state = self.state.lock();
        state.copy_failures.extend(std::iter::repeat(code).take(count));
    }

    /// Force the next data block to be rejected with `code`.
    pub fn fail_next_ingest(&self, code: i32) {
        self.state.lock().ingest_failures.push_back(code);
    }

    /// Report `reply` verbatim for `DATA:NVOLatile:FREE?`.
    pub fn set_free_reply(&self, reply: Option<&str>) {
        self.state.lock().free_override = reply.map(str::to_string);
    }

    /// Drop the volatile buffer, as a power cycle would.
    pub fn clear_volatile(&self) {
        self.state.lock().volatile_points = None;
    }

    pub fn inject_error(&self, code: i32, message: &str) {
        self.state
            .lock()
            .errors
            .push_back((code, message.to_string()));
    }

    /// Block the bus when a command starting with `prefix` is written.
    pub fn pause_on(&self, prefix: &str) -> PauseHandle {
        let handle = PauseHandle {
            prefix: prefix.to_string(),
            inner: Arc::new((Mutex::new(GateState::default()), Condvar::new())),
        };
        self.state.lock().pause = Some(handle.clone());
        handle
    }

    /// Every line written, in order.
    pub fn wire(&self) -> Vec<String> {
        self.state.lock().wire.clone()
    }

    /// Written lines excluding queries.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .wire
            .iter()
            .filter(|l| !l.ends_with('?'))
            .cloned()
            .collect()
    }

    pub fn count_of(&self, line: &str) -> usize {
        self.state.lock().wire.iter().filter(|l| *l == line).count()
    }

    pub fn clear_wire(&self) {
        self.state.lock().wire.clear();
    }

    /// Last value written for a `<header> <value>` command.
    pub fn last_value(&self, header: &str) -> Option<String> {
        self.state.lock().values.get(header).cloned()
    }

    pub fn shape(&self) -> String {
        self.state.lock().shape.clone()
    }

    pub fn selected_arb(&self) -> String {
        self.state.lock().selected_arb.clone()
    }

    pub fn volatile_points(&self) -> Option<usize> {
        self.state.lock().volatile_points
    }

    pub fn nonvolatile_names(&self) -> Vec<String> {
        self.state.lock().user_arbs.clone()
    }

    /// Every timeout applied to the session, in order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.lock().timeouts.clone()
    }

    pub fn pending_errors(&self) -> usize {
        self.state.lock().errors.len()
    }
}

impl Transport for SimulatedInstrument {
    fn is_available(&self) -> bool {
        self.state.lock().available
    }

    fn connect(&mut self, resource: &str, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(TransportError::NotAvailable);
        }
        if state.fail_open {
            state.open = false;
            return Err(TransportError::OpenFailed {
                resource: resource.to_string(),
                status: fgen_visa::ffi::VI_ERROR_RSRC_NFOUND,
            });
        }
        state.open = true;
        state.resource = resource.to_string();
        state.timeout = timeout;
        state.timeouts.push(timeout);
        state.replies.clear();
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let gate = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            if state.io_failure {
                return Err(TransportError::Io {
                    operation: "viPrintf",
                    status: fgen_visa::ffi::VI_ERROR_IO,
                });
            }
            state.wire.push(line.to_string());
            state.handle(line);
            state
                .pause
                .as_ref()
                .filter(|p| line.starts_with(&p.prefix))
                .cloned()
        };
        if let Some(gate) = gate {
            gate.block();
        }
        Ok(())
    }

    fn read_line(&mut self, max_len: usize) -> Result<String, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if state.io_failure {
            return Err(TransportError::Io {
                operation: "viRead",
                status: fgen_visa::ffi::VI_ERROR_IO,
            });
        }
        if !state.responsive {
            state.replies.clear();
            return Err(TransportError::Timeout { operation: "viRead" });
        }
        match state.replies.pop_front() {
            Some(mut reply) => {
                if reply.len() > max_len {
                    let mut end = max_len;
                    while !reply.is_char_boundary(end) {
                        end -= 1;
                    }
                    reply.truncate(end);
                }
                Ok(reply)
            }
            None => Err(TransportError::Timeout { operation: "viRead" }),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.timeout = timeout;
        state.timeouts.push(timeout);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.open {
            state.wire.push(fgen_visa::RETURN_TO_LOCAL.to_string());
            state.open = false;
            state.replies.clear();
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SimulatedInstrument {
        let mut sim = SimulatedInstrument::new();
        sim.connect("GPIB0::10::INSTR", Duration::from_millis(500))
            .unwrap();
        sim
    }

    fn ask(sim: &mut SimulatedInstrument, line: &str) -> String {
        sim.write_line(line).unwrap();
        sim.read_line(1024).unwrap()
    }

    #[test]
    fn error_queue_defaults_to_no_error() {
        let mut sim = open();
        assert_eq!(ask(&mut sim, "SYST:ERR?"), "+0,\"No error\"");
        sim.inject_error(-221, "Settings conflict");
        assert_eq!(ask(&mut sim, "SYST:ERR?"), "-221,\"Settings conflict\"");
    }

    #[test]
    fn empty_catalog_is_a_quoted_empty_string() {
        let mut sim = open();
        assert_eq!(ask(&mut sim, "DATA:NVOLatile:CATalog?"), "\"\"");
        assert_eq!(ask(&mut sim, "DATA:NVOLatile:FREE?"), "4");
    }

    #[test]
    fn copy_requires_volatile_and_free_slot() {
        let mut sim = open();
        sim.write_line("DATA:COPY MYARB,VOLATILE").unwrap();
        assert_eq!(ask(&mut sim, "SYST:ERR?"), "+780,\"Arb waveform data not loaded into VOLATILE memory\"");

        sim.write_line(&format!("DATA VOLATILE{}", ",0.5".repeat(8))).unwrap();
        assert_eq!(sim.volatile_points(), Some(8));
        sim.seed_user_arbs(&["A", "B", "C", "D"]);
        sim.write_line("DATA:COPY MYARB,VOLATILE").unwrap();
        assert!(ask(&mut sim, "SYST:ERR?").starts_with("+781"));

        // Existing names are overwritten
        sim.write_line("DATA:COPY A,VOLATILE").unwrap();
        assert!(ask(&mut sim, "SYST:ERR?").starts_with("+0"));
    }

    #[test]
    fn unanswered_read_times_out() {
        let mut sim = open();
        assert!(sim.read_line(64).unwrap_err().is_timeout());
    }

    #[test]
    fn close_returns_to_local() {
        let mut sim = open();
        sim.close();
        sim.close();
        assert_eq!(sim.wire(), vec!["SYST:LOC"]);
        assert!(!sim.is_open());
    }
}
