//! VISA transport for fgen.
//!
//! The vendor library (`visa32.dll`, `libvisa.so`, ...) is resolved at runtime
//! with `libloading`, so the crate builds and runs on hosts without a VISA
//! install; such hosts get a transport that reports itself unavailable.
//!
//! - [`VisaLibrary`]: loaded library with the bound entry points
//! - [`Transport`]: the line-oriented channel the driver talks through
//! - [`VisaTransport`]: [`Transport`] over a [`VisaLibrary`] session

pub mod error;
pub mod ffi;
pub mod library;
pub mod transport;

pub use error::TransportError;
pub use library::VisaLibrary;
pub use transport::{trim_response, Transport, VisaTransport, DEFAULT_READ_LEN, RETURN_TO_LOCAL};
