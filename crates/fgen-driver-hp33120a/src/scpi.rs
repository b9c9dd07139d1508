//! SCPI text helpers for the 33120A.
//!
//! All numbers go through [`number`] / [`fixed`], which use Rust's
//! formatting machinery and therefore always emit a `.` decimal separator
//! regardless of the host locale.

use fgen_core::{FgenError, Result};

/// Error-queue query.
pub const SYST_ERR: &str = "SYST:ERR?";
pub const IDN: &str = "*IDN?";
pub const REMOTE: &str = "SYST:REM";
pub const CLEAR_STATUS: &str = "*CLS";

pub const CATALOG_ALL: &str = "DATA:CATalog?";
pub const CATALOG_NVOL: &str = "DATA:NVOLatile:CATalog?";
pub const NVOL_FREE: &str = "DATA:NVOLatile:FREE?";

/// Longest ARB name the instrument accepts.
pub const MAX_NAME_LEN: usize = 12;

/// Six-decimal fixed-point.
pub fn number(value: f64) -> String {
    fixed(value, 6)
}

/// Fixed-point with `decimals` fractional digits.
pub fn fixed(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

/// `<header> <value>` with six decimals.
pub fn scalar(header: &str, value: f64) -> String {
    format!("{} {}", header, number(value))
}

pub fn on_off(header: &str, enabled: bool) -> String {
    format!("{} {}", header, if enabled { "ON" } else { "OFF" })
}

/// Success is any reply beginning with `+0` or containing `No error`.
pub fn is_no_error(reply: &str) -> bool {
    reply.starts_with("+0") || reply.contains("No error")
}

/// Parsed `SYST:ERR?` reply: `<code>,"<text>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub code: i32,
    pub message: String,
}

impl ErrorReply {
    pub fn parse(reply: &str) -> Option<Self> {
        let (code, message) = match reply.split_once(',') {
            Some((code, message)) => (code, message),
            None => (reply, ""),
        };
        let code = code.trim().trim_start_matches('+').parse::<i32>().ok()?;
        Some(Self {
            code,
            message: message.trim().trim_matches('"').to_string(),
        })
    }

    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

/// Split a catalog reply into names: comma-separated, double-quoted.
///
/// Empty tokens (including the `""` an empty catalog returns) are dropped.
pub fn parse_catalog(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(|token| token.trim().trim_matches('"').trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_count(reply: &str) -> Option<usize> {
    let trimmed = reply.trim().trim_start_matches('+');
    trimmed
        .parse::<usize>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as usize))
}

/// Uppercase and validate an ARB name.
///
/// Names start with a letter, continue with letters, digits or `_`, and are
/// at most 12 characters long.
pub fn normalize_arb_name(name: &str) -> Result<String> {
    let upper = name.trim().to_ascii_uppercase();
    let mut chars = upper.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_first || !valid_rest || upper.len() > MAX_NAME_LEN {
        return Err(FgenError::InvalidParameter(format!(
            "invalid ARB name '{}': letter first, then letters, digits or '_', max {} chars",
            name, MAX_NAME_LEN
        )));
    }
    Ok(upper)
}

/// Reject anything that would split into two commands on the wire.
pub fn check_line(command: &str) -> Result<()> {
    if command.is_empty() || command.contains(['\n', '\r', '\0']) {
        return Err(FgenError::InvalidParameter(format!(
            "command must be a single non-empty line: {:?}",
            command
        )));
    }
    Ok(())
}

pub fn check_finite(what: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FgenError::InvalidParameter(format!("{} must be finite, got {}", what, value)))
    }
}

/// Build `DATA VOLATILE,<v1>,...,<vN>`.
///
/// Large blocks yield to the scheduler every 1000 samples so the build does
/// not monopolise a core.
pub fn volatile_block(samples: &[f32]) -> String {
    const YIELD_ABOVE: usize = 5000;
    const YIELD_EVERY: usize = 1000;

    // "-0.123456," is at most 10 bytes
    let mut block = String::with_capacity(14 + samples.len() * 10);
    block.push_str("DATA VOLATILE");
    for (i, sample) in samples.iter().enumerate() {
        block.push(',');
        block.push_str(&number(f64::from(*sample)));
        if samples.len() > YIELD_ABOVE && i % YIELD_EVERY == YIELD_EVERY - 1 {
            std::thread::yield_now();
        }
    }
    block
}
