//! Line-oriented text channel to one instrument.
//!
//! [`Transport`] is the seam between the driver and the bus. The driver owns
//! one boxed transport behind its session lock; implementations therefore take
//! `&mut self` and do no locking of their own.

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::ffi::{self, ViSession, VI_ATTR_TMO_VALUE, VI_ERROR_TMO, VI_NULL, VI_WRITE_BUF};
use crate::library::VisaLibrary;

/// Line sent before the session is closed.
pub const RETURN_TO_LOCAL: &str = "SYST:LOC";

/// Default read buffer for single-line responses.
pub const DEFAULT_READ_LEN: usize = 1024;

/// Blocking text request/response channel.
pub trait Transport: Send {
    /// True once the vendor library (or equivalent) is bound.
    fn is_available(&self) -> bool;

    /// Open a session on `resource` and set the per-operation timeout.
    ///
    /// A half-opened session is released before returning an error.
    fn connect(&mut self, resource: &str, timeout: Duration) -> Result<()>;

    /// Send `line` followed by `\n`, then flush.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read up to `max_len` bytes, stripping trailing CR, LF and spaces.
    fn read_line(&mut self, max_len: usize) -> Result<String>;

    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Return the instrument to local control and release the session.
    /// Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Strip the trailing terminator characters the instrument appends.
pub fn trim_response(raw: &str) -> &str {
    raw.trim_end_matches(['\r', '\n', ' '])
}

/// [`Transport`] over a dynamically loaded VISA library.
pub struct VisaTransport {
    library: Option<Arc<VisaLibrary>>,
    resource_manager: ViSession,
    instrument: ViSession,
    resource: String,
}

impl VisaTransport {
    pub fn new(library: Arc<VisaLibrary>) -> Self {
        Self {
            library: Some(library),
            resource_manager: VI_NULL,
            instrument: VI_NULL,
            resource: String::new(),
        }
    }

    /// A transport whose library failed to load; every connect fails with
    /// [`TransportError::NotAvailable`].
    pub fn unavailable() -> Self {
        Self {
            library: None,
            resource_manager: VI_NULL,
            instrument: VI_NULL,
            resource: String::new(),
        }
    }

    /// Load the library from the usual search path, falling back to an
    /// unavailable transport.
    pub fn load(explicit: Option<&std::path::Path>) -> Self {
        match VisaLibrary::load(explicit) {
            Ok(library) => Self::new(Arc::new(library)),
            Err(err) => {
                warn!(error = %err, "VISA library unavailable");
                Self::unavailable()
            }
        }
    }

    fn library(&self) -> Result<&VisaLibrary> {
        self.library.as_deref().ok_or(TransportError::NotAvailable)
    }

    fn release_handles(&mut self) {
        let Some(close) = self.library.as_ref().and_then(|lib| lib.close) else {
            self.instrument = VI_NULL;
            self.resource_manager = VI_NULL;
            return;
        };
        // Reverse order of acquisition.
        for (label, handle) in [
            ("instrument", std::mem::replace(&mut self.instrument, VI_NULL)),
            ("resource manager", std::mem::replace(&mut self.resource_manager, VI_NULL)),
        ] {
            if handle != VI_NULL {
                // SAFETY: handle was returned by viOpen/viOpenDefaultRM and is closed once.
                let status = unsafe { close(handle) };
                if !ffi::is_success(status) {
                    warn!(handle = label, status, "viClose failed");
                }
            }
        }
    }
}

impl Transport for VisaTransport {
    fn is_available(&self) -> bool {
        self.library.is_some()
    }

    fn connect(&mut self, resource: &str, timeout: Duration) -> Result<()> {
        if self.is_open() {
            self.close();
        }
        let library = self.library()?;
        let open_default_rm = library.open_default_rm;
        let open = library.open;
        let rsrc = CString::new(resource)
            .map_err(|_| TransportError::InvalidCommand(resource.to_string()))?;

        let mut rm: ViSession = VI_NULL;
        // SAFETY: out-pointer to a local.
        let status = unsafe { open_default_rm(&mut rm) };
        if !ffi::is_success(status) {
            return Err(TransportError::OpenFailed {
                resource: resource.to_string(),
                status,
            });
        }
        self.resource_manager = rm;

        let mut instr: ViSession = VI_NULL;
        // SAFETY: rm is a live resource manager; rsrc outlives the call.
        let status = unsafe { open(rm, rsrc.as_ptr(), VI_NULL, VI_NULL, &mut instr) };
        if !ffi::is_success(status) {
            self.release_handles();
            return Err(TransportError::OpenFailed {
                resource: resource.to_string(),
                status,
            });
        }
        self.instrument = instr;
        self.resource = resource.to_string();

        if let Err(err) = self.set_timeout(timeout) {
            warn!(resource, error = %err, "Could not set session timeout");
        }
        debug!(resource, "VISA session opened");
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let library = self.library()?;
        let printf = library
            .printf
            .ok_or(TransportError::SymbolMissing { symbol: "viPrintf" })?;
        let flush = library.flush;

        let payload = CString::new(format!("{}\n", line))
            .map_err(|_| TransportError::InvalidCommand(line.to_string()))?;

        // SAFETY: "%s" consumes exactly one C string argument.
        let status = unsafe { printf(self.instrument, c"%s".as_ptr(), payload.as_ptr()) };
        if status == VI_ERROR_TMO {
            return Err(TransportError::Timeout { operation: "viPrintf" });
        }
        if !ffi::is_success(status) {
            return Err(TransportError::Io {
                operation: "viPrintf",
                status,
            });
        }

        if let Some(flush) = flush {
            // SAFETY: live session handle.
            let status = unsafe { flush(self.instrument, VI_WRITE_BUF) };
            if !ffi::is_success(status) {
                return Err(TransportError::Io {
                    operation: "viFlush",
                    status,
                });
            }
        }
        Ok(())
    }

    fn read_line(&mut self, max_len: usize) -> Result<String> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let read = self
            .library()?
            .read
            .ok_or(TransportError::SymbolMissing { symbol: "viRead" })?;

        let mut buffer = vec![0u8; max_len.max(1)];
        let mut count: u32 = 0;
        // SAFETY: buffer is valid for buffer.len() bytes; count is an out-pointer to a local.
        let status = unsafe {
            read(
                self.instrument,
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut count,
            )
        };
        if status == VI_ERROR_TMO {
            return Err(TransportError::Timeout { operation: "viRead" });
        }
        if !ffi::is_success(status) {
            return Err(TransportError::Io {
                operation: "viRead",
                status,
            });
        }

        buffer.truncate((count as usize).min(buffer.len()));
        let text = String::from_utf8_lossy(&buffer);
        Ok(trim_response(&text).to_string())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let Some(set_attribute) = self.library()?.set_attribute else {
            return Err(TransportError::SymbolMissing {
                symbol: "viSetAttribute",
            });
        };
        let millis = timeout.as_millis().min(u32::MAX as u128) as ffi::ViAttrState;
        // SAFETY: live session handle; VI_ATTR_TMO_VALUE takes milliseconds.
        let status = unsafe { set_attribute(self.instrument, VI_ATTR_TMO_VALUE, millis) };
        if !ffi::is_success(status) {
            return Err(TransportError::Io {
                operation: "viSetAttribute",
                status,
            });
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.instrument != VI_NULL {
            if let Err(err) = self.write_line(RETURN_TO_LOCAL) {
                debug!(error = %err, "Return to local failed during close");
            }
        }
        self.release_handles();
        if !self.resource.is_empty() {
            debug!(resource = %self.resource, "VISA session closed");
            self.resource.clear();
        }
    }

    fn is_open(&self) -> bool {
        self.instrument != VI_NULL
    }
}

impl Drop for VisaTransport {
    fn drop(&mut self) {
        self.close();
    }
}
