//! Runtime binding of the vendor VISA shared library.

use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::ffi::{FnClose, FnFlush, FnOpen, FnOpenDefaultRm, FnPrintf, FnRead, FnSetAttribute};

#[cfg(windows)]
const DEFAULT_CANDIDATES: &[&str] = &[
    "visa32.dll",
    "C:\\Program Files\\IVI Foundation\\VISA\\Win64\\bin\\visa64.dll",
    "C:\\Program Files (x86)\\IVI Foundation\\VISA\\WinNT\\bin\\visa32.dll",
];

#[cfg(target_os = "macos")]
const DEFAULT_CANDIDATES: &[&str] = &["libvisa.dylib", "/Library/Frameworks/VISA.framework/VISA"];

#[cfg(all(unix, not(target_os = "macos")))]
const DEFAULT_CANDIDATES: &[&str] = &[
    "libvisa.so",
    "libvisa.so.0",
    "/usr/local/vxipnp/linux/lib64/libvisa.so",
];

/// Candidate library paths in search order: the explicit path (if any),
/// then the platform's plain library name, then well-known install paths.
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(DEFAULT_CANDIDATES.iter().map(PathBuf::from))
        .collect()
}

/// A loaded VISA library with its bound entry points.
///
/// Only `viOpenDefaultRM` and `viOpen` are mandatory; the remaining symbols
/// are checked when an operation needs them.
pub struct VisaLibrary {
    path: PathBuf,
    pub(crate) open_default_rm: FnOpenDefaultRm,
    pub(crate) open: FnOpen,
    pub(crate) close: Option<FnClose>,
    pub(crate) printf: Option<FnPrintf>,
    pub(crate) read: Option<FnRead>,
    pub(crate) set_attribute: Option<FnSetAttribute>,
    pub(crate) flush: Option<FnFlush>,
    // Keeps the function pointers above valid.
    _library: Library,
}

// SAFETY: the struct only holds plain function pointers into a library that
// lives as long as the struct. VISA entry points are callable from any thread;
// session-level serialization is the caller's job.
unsafe impl Send for VisaLibrary {}
unsafe impl Sync for VisaLibrary {}

impl std::fmt::Debug for VisaLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisaLibrary")
            .field("path", &self.path)
            .field("printf", &self.printf.is_some())
            .field("read", &self.read.is_some())
            .field("set_attribute", &self.set_attribute.is_some())
            .field("flush", &self.flush.is_some())
            .finish()
    }
}

impl VisaLibrary {
    /// Load the first candidate that opens and exposes the mandatory symbols.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let candidates = candidate_paths(explicit);
        let mut tried = Vec::with_capacity(candidates.len());
        let mut last_symbol_error = None;

        for path in candidates {
            match Self::load_path(&path) {
                Ok(library) => {
                    info!(path = %path.display(), "Loaded VISA library");
                    return Ok(library);
                }
                Err(err @ TransportError::SymbolMissing { .. }) => {
                    debug!(path = %path.display(), error = %err, "VISA library rejected");
                    last_symbol_error = Some(err);
                }
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "VISA library not loadable");
                }
            }
            tried.push(path.display().to_string());
        }

        Err(last_symbol_error.unwrap_or(TransportError::LibraryNotFound { tried }))
    }

    /// Load a specific library file.
    pub fn load_path(path: &Path) -> Result<Self> {
        // SAFETY: loading a shared library runs its initialisers; VISA
        // implementations are ordinary C libraries without unusual init code.
        let library = unsafe { Library::new(path) }.map_err(|_| {
            TransportError::LibraryNotFound {
                tried: vec![path.display().to_string()],
            }
        })?;

        // SAFETY: signatures match visa.h for every bound symbol.
        unsafe {
            let open_default_rm = required::<FnOpenDefaultRm>(&library, b"viOpenDefaultRM\0", "viOpenDefaultRM")?;
            let open = required::<FnOpen>(&library, b"viOpen\0", "viOpen")?;
            Ok(Self {
                path: path.to_path_buf(),
                open_default_rm,
                open,
                close: optional::<FnClose>(&library, b"viClose\0"),
                printf: optional::<FnPrintf>(&library, b"viPrintf\0"),
                read: optional::<FnRead>(&library, b"viRead\0"),
                set_attribute: optional::<FnSetAttribute>(&library, b"viSetAttribute\0"),
                flush: optional::<FnFlush>(&library, b"viFlush\0"),
                _library: library,
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn required<T: Copy>(library: &Library, symbol: &[u8], name: &'static str) -> Result<T> {
    let sym: Symbol<T> = library
        .get(symbol)
        .map_err(|_| TransportError::SymbolMissing { symbol: name })?;
    Ok(*sym)
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
    library.get::<T>(symbol).ok().map(|sym| *sym)
}
