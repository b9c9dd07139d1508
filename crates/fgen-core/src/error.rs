//! Error types shared by every fgen crate.
//!
//! [`FgenError`] is the single error type returned by the driver, the command
//! pipeline and the ARB pipeline. Each variant belongs to one [`ErrorKind`],
//! which is what callers branch on when deciding whether a failure is fatal,
//! retryable or merely diagnostic.

use std::fmt;
use thiserror::Error;

/// Result type alias for fgen operations.
pub type Result<T> = std::result::Result<T, FgenError>;

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Vendor library missing or a required symbol could not be resolved.
    TransportUnavailable,
    /// Opening the session returned a non-success status.
    ConnectFailed,
    /// The instrument reported a non-zero SCPI error code.
    DeviceReported,
    /// A read or write did not complete within the session timeout.
    Timeout,
    /// ARB memory exhausted or name bookkeeping failed on the instrument.
    Memory,
    /// Rejected before touching the bus.
    InvalidInput,
    /// Anything else: I/O, closed sessions, worker panics.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::TransportUnavailable => "transport_unavailable",
            ErrorKind::ConnectFailed => "connect_failed",
            ErrorKind::DeviceReported => "device_reported",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Memory => "memory",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{}", label)
    }
}

/// SCPI error codes the ARB pipeline reacts to.
pub mod codes {
    /// No waveform in volatile memory.
    pub const VOLATILE_NOT_LOADED: i32 = 780;
    /// All four non-volatile slots are occupied.
    pub const MEMORY_FULL: i32 = 781;
    /// Name conflicts with an existing waveform.
    pub const NAME_CONFLICT: i32 = 782;
    /// Name conflicts with a built-in waveform.
    pub const NAME_RESERVED: i32 = 783;
    /// Referenced waveform does not exist.
    pub const NOT_FOUND: i32 = 785;
    /// Built-in waveforms cannot be deleted.
    pub const CANNOT_DELETE: i32 = 786;
    /// The waveform is currently active.
    pub const ACTIVE: i32 = 787;

    /// Every code that signals an ARB memory failure.
    pub const MEMORY_ERRORS: [i32; 7] = [
        VOLATILE_NOT_LOADED,
        MEMORY_FULL,
        NAME_CONFLICT,
        NAME_RESERVED,
        NOT_FOUND,
        CANNOT_DELETE,
        ACTIVE,
    ];

    pub fn is_memory_error(code: i32) -> bool {
        MEMORY_ERRORS.contains(&code)
    }
}

/// Errors that can occur while controlling the instrument.
#[derive(Error, Debug)]
pub enum FgenError {
    /// Driver is in the Disconnected state.
    #[error("Device not connected")]
    NotConnected,

    /// The vendor instrument-control library could not be bound.
    #[error("VISA transport not available: {0}")]
    TransportNotAvailable(String),

    /// Session open failed.
    #[error("Failed to open '{resource}': {message}")]
    ConnectFailed { resource: String, message: String },

    /// Low-level transport failure (write, read, attribute).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Read did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The instrument answered `SYST:ERR?` with a non-zero code.
    #[error("Device error after '{command}': {code},\"{message}\"")]
    Device {
        command: String,
        code: i32,
        message: String,
    },

    /// ARB memory reconciliation failed.
    #[error("ARB memory error {code}: {message}")]
    Memory { code: i32, message: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid slot index {0}")]
    InvalidSlot(usize),

    #[error("Upload already in progress for slot {0}")]
    UploadInProgress(usize),

    #[error("No data in slot {0}")]
    NoData(usize),

    #[error("Resampling failed")]
    ResampleEmpty,

    /// Audio file could not be decoded.
    #[error("Audio decode error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background worker failed to stop or panicked.
    #[error("Worker error: {0}")]
    Worker(String),
}

impl FgenError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FgenError::TransportNotAvailable(_) => ErrorKind::TransportUnavailable,
            FgenError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            FgenError::Device { code, .. } if codes::is_memory_error(*code) => ErrorKind::Memory,
            FgenError::Device { .. } => ErrorKind::DeviceReported,
            FgenError::Timeout(_) => ErrorKind::Timeout,
            FgenError::Memory { .. } => ErrorKind::Memory,
            FgenError::InvalidParameter(_)
            | FgenError::InvalidSlot(_)
            | FgenError::UploadInProgress(_)
            | FgenError::NoData(_)
            | FgenError::ResampleEmpty
            | FgenError::Audio(_) => ErrorKind::InvalidInput,
            FgenError::NotConnected
            | FgenError::Transport(_)
            | FgenError::Config(_)
            | FgenError::Io(_)
            | FgenError::Worker(_) => ErrorKind::Unexpected,
        }
    }

    /// True for errors that stem from a lost or closed session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FgenError::NotConnected | FgenError::Transport(_) | FgenError::Timeout(_)
        )
    }
}

impl From<figment::Error> for FgenError {
    fn from(err: figment::Error) -> Self {
        FgenError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_with_memory_codes_classify_as_memory() {
        let err = FgenError::Device {
            command: "DATA:COPY X,VOLATILE".into(),
            code: codes::MEMORY_FULL,
            message: "Not enough memory".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Memory);

        let err = FgenError::Device {
            command: "FREQ 1e9".into(),
            code: -222,
            message: "Data out of range".into(),
        };
        assert_eq!(err.kind(), ErrorKind::DeviceReported);
    }

    #[test]
    fn input_errors_never_count_as_transport() {
        assert!(!FgenError::ResampleEmpty.is_transport());
        assert!(!FgenError::InvalidSlot(7).is_transport());
        assert!(FgenError::NotConnected.is_transport());
        assert_eq!(FgenError::NoData(1).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn display_includes_device_response() {
        let err = FgenError::Device {
            command: "AM:SOUR BOTH".into(),
            code: -221,
            message: "Settings conflict".into(),
        };
        assert_eq!(
            err.to_string(),
            "Device error after 'AM:SOUR BOTH': -221,\"Settings conflict\""
        );
    }
}
