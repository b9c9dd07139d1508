//! Raw VISA types, constants and function signatures.
//!
//! Only the subset fgen binds at runtime. Values follow the IVI VISA
//! headers (`visa.h` / `visatype.h`).

#![allow(non_camel_case_types)]

use std::os::raw::c_char;

pub type ViSession = u32;
pub type ViObject = u32;
pub type ViStatus = i32;
pub type ViUInt16 = u16;
pub type ViUInt32 = u32;
pub type ViAttr = u32;
/// `ViUInt64` on 64-bit targets, `ViUInt32` otherwise.
pub type ViAttrState = usize;
pub type ViAccessMode = u32;

pub const VI_NULL: u32 = 0;
pub const VI_SUCCESS: ViStatus = 0;

/// Read/write timeout in milliseconds.
pub const VI_ATTR_TMO_VALUE: ViAttr = 0x3FFF_001A;
/// Flush the formatted-I/O write buffer.
pub const VI_WRITE_BUF: ViUInt16 = 0x02;

// Error codes are defined as unsigned hex in visa.h and reinterpreted as ViStatus.
pub const VI_ERROR_TMO: ViStatus = 0xBFFF_0015_u32 as ViStatus;
pub const VI_ERROR_RSRC_NFOUND: ViStatus = 0xBFFF_0011_u32 as ViStatus;
pub const VI_ERROR_INV_OBJECT: ViStatus = 0xBFFF_000E_u32 as ViStatus;
pub const VI_ERROR_CONN_LOST: ViStatus = 0xBFFF_00A6_u32 as ViStatus;
pub const VI_ERROR_IO: ViStatus = 0xBFFF_003E_u32 as ViStatus;

pub type FnOpenDefaultRm = unsafe extern "C" fn(vi: *mut ViSession) -> ViStatus;
pub type FnOpen = unsafe extern "C" fn(
    sesn: ViSession,
    name: *const c_char,
    mode: ViAccessMode,
    timeout: ViUInt32,
    vi: *mut ViSession,
) -> ViStatus;
pub type FnClose = unsafe extern "C" fn(vi: ViObject) -> ViStatus;
pub type FnPrintf = unsafe extern "C" fn(vi: ViSession, fmt: *const c_char, ...) -> ViStatus;
pub type FnRead = unsafe extern "C" fn(
    vi: ViSession,
    buf: *mut u8,
    cnt: ViUInt32,
    ret_cnt: *mut ViUInt32,
) -> ViStatus;
pub type FnSetAttribute =
    unsafe extern "C" fn(vi: ViObject, attr: ViAttr, value: ViAttrState) -> ViStatus;
pub type FnFlush = unsafe extern "C" fn(vi: ViSession, mask: ViUInt16) -> ViStatus;

/// Negative status codes are errors; zero and positive are (qualified) success.
pub fn is_success(status: ViStatus) -> bool {
    status >= VI_SUCCESS
}

/// Short symbolic name for the status codes fgen reports.
pub fn status_name(status: ViStatus) -> &'static str {
    match status {
        VI_SUCCESS => "VI_SUCCESS",
        VI_ERROR_TMO => "VI_ERROR_TMO",
        VI_ERROR_RSRC_NFOUND => "VI_ERROR_RSRC_NFOUND",
        VI_ERROR_INV_OBJECT => "VI_ERROR_INV_OBJECT",
        VI_ERROR_CONN_LOST => "VI_ERROR_CONN_LOST",
        VI_ERROR_IO => "VI_ERROR_IO",
        s if s > 0 => "VI_SUCCESS (qualified)",
        _ => "VI_ERROR",
    }
}
