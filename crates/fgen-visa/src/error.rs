//! Error types for VISA transport operations.

use fgen_core::FgenError;
use thiserror::Error;

use crate::ffi::{status_name, ViStatus};

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// None of the candidate library paths could be loaded.
    #[error("VISA library not found (tried: {})", tried.join(", "))]
    LibraryNotFound { tried: Vec<String> },

    /// A required entry point is missing from the loaded library.
    #[error("VISA symbol '{symbol}' not found")]
    SymbolMissing { symbol: &'static str },

    /// The transport was never bound to a library.
    #[error("VISA library not loaded")]
    NotAvailable,

    #[error("Failed to open '{resource}': {} ({status:#010x})", status_name(*status))]
    OpenFailed { resource: String, status: ViStatus },

    /// Operation attempted without an open session.
    #[error("Session not open")]
    NotOpen,

    #[error("Timeout during {operation}")]
    Timeout { operation: &'static str },

    #[error("{operation} failed: {} ({status:#010x})", status_name(*status))]
    Io {
        operation: &'static str,
        status: ViStatus,
    },

    /// Command text cannot be passed to the C API.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

impl From<TransportError> for FgenError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::LibraryNotFound { .. }
            | TransportError::SymbolMissing { .. }
            | TransportError::NotAvailable => FgenError::TransportNotAvailable(err.to_string()),
            TransportError::OpenFailed { ref resource, .. } => FgenError::ConnectFailed {
                resource: resource.clone(),
                message: err.to_string(),
            },
            TransportError::NotOpen => FgenError::NotConnected,
            TransportError::Timeout { .. } => FgenError::Timeout(err.to_string()),
            TransportError::Io { .. } => FgenError::Transport(err.to_string()),
            TransportError::InvalidCommand(msg) => FgenError::InvalidParameter(msg),
        }
    }
}
