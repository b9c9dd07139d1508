//! ARB download protocol.
//!
//! The 33120A stages a waveform in VOLATILE memory and copies it to one of
//! four named non-volatile slots. The copy's error response is not a
//! reliable success signal, so every copy is verified by re-reading the
//! non-volatile catalog.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use fgen_core::config::{MAX_ARB_POINTS, MIN_ARB_POINTS};
use fgen_core::{codes, FgenError, Result};

use super::resample;
use crate::catalog::{self, Catalog};
use crate::driver::Hp33120a;
use crate::scpi;
use crate::types::Waveform;

/// Error-queue entries read after each copy.
const COPY_ERROR_DRAIN: usize = 8;

/// Notice attached to every VOLATILE fallback.
pub const VOLATILE_NOTICE: &str = "VOLATILE memory is lost on power cycle";

/// Where an uploaded waveform ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoredAs {
    /// Copied into a named non-volatile slot.
    NonVolatile,
    /// Copy failed; playing straight from the staging buffer.
    Volatile,
}

/// Result of a successful [`Hp33120a::download_arb`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbOutcome {
    pub name: String,
    pub points: usize,
    pub stored: StoredAs,
}

impl ArbOutcome {
    /// Name passed to `FUNCtion:USER`.
    pub fn selected(&self) -> &str {
        match self.stored {
            StoredAs::NonVolatile => &self.name,
            StoredAs::Volatile => catalog::VOLATILE,
        }
    }

    pub fn is_volatile_fallback(&self) -> bool {
        self.stored == StoredAs::Volatile
    }

    pub fn message(&self) -> String {
        match self.stored {
            StoredAs::NonVolatile => format!("Uploaded {} points", self.points),
            StoredAs::Volatile => format!(
                "Uploaded {} points to VOLATILE; could not store {} ({})",
                self.points, self.name, VOLATILE_NOTICE
            ),
        }
    }
}

impl fmt::Display for ArbOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Outcome of one copy attempt.
#[derive(Debug, Clone, Copy)]
struct CopyAttempt {
    present: bool,
    memory_code: Option<i32>,
}

impl CopyAttempt {
    fn stored(&self) -> bool {
        self.present && self.memory_code.is_none()
    }
}

/// Device errors are already logged; only a lost session aborts the step.
fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if !err.is_transport() => {
            debug!(error = %err, "Continuing after device error");
            Ok(())
        }
        other => other,
    }
}

impl Hp33120a {
    /// Download `samples` as user waveform `name` and make it the active
    /// carrier.
    ///
    /// `samples` is truncated or zero-padded to `points` and normalized. If
    /// the copy into non-volatile memory cannot be completed the waveform
    /// is played from VOLATILE instead and the outcome says so.
    pub fn download_arb(&self, name: &str, samples: &[f32], points: usize) -> Result<ArbOutcome> {
        let _serial = self.download_lock.lock();
        self.ensure_connected()?;

        if samples.is_empty() {
            self.set_last_error("No samples to upload");
            return Err(FgenError::InvalidParameter("no samples to upload".into()));
        }
        if !(MIN_ARB_POINTS..=MAX_ARB_POINTS).contains(&points) {
            self.set_last_error(format!("Invalid point count {}", points));
            return Err(FgenError::InvalidParameter(format!(
                "point count {} outside {}..={}",
                points, MIN_ARB_POINTS, MAX_ARB_POINTS
            )));
        }
        let name = self.arb_name(name)?;
        if catalog::is_reserved(&name) {
            self.set_last_error(format!("{} is a reserved name", name));
            return Err(FgenError::InvalidParameter(format!(
                "{} is a reserved waveform name",
                name
            )));
        }

        let data = resample::fit_to_length(samples, points);
        let block = scpi::volatile_block(&data);
        info!(name = %name, points, "Starting ARB download");

        self.transfer(&name, &block, points).map_err(|err| match err {
            FgenError::NotConnected => {
                let message = "session closed during ARB upload".to_string();
                self.set_last_error(message.clone());
                FgenError::Transport(message)
            }
            other => other,
        })
    }

    fn transfer(&self, name: &str, block: &str, points: usize) -> Result<ArbOutcome> {
        self.stage_volatile(block)?;
        self.make_room(name)?;

        let mut attempt = self.copy_and_verify(name)?;
        match attempt.memory_code {
            _ if attempt.stored() => {}
            Some(codes::MEMORY_FULL) => {
                info!(name, "Memory full after copy; evicting and retrying");
                self.evict_for(name)?;
                attempt = self.copy_and_verify(name)?;
            }
            Some(codes::VOLATILE_NOT_LOADED) => {
                info!(name, "VOLATILE lost; resending data block");
                self.stage_volatile(block)?;
                attempt = self.copy_and_verify(name)?;
            }
            _ => {}
        }

        let stored = if attempt.stored() {
            StoredAs::NonVolatile
        } else {
            warn!(name, code = ?attempt.memory_code, "Copy failed; falling back to VOLATILE");
            self.log(&format!(
                "Could not store {} in non-volatile memory; using VOLATILE. {}",
                name, VOLATILE_NOTICE
            ));
            StoredAs::Volatile
        };
        let outcome = ArbOutcome {
            name: name.to_string(),
            points,
            stored,
        };

        self.select_user_arb(outcome.selected())?;
        self.set_waveform(Waveform::User)?;
        info!(name, selected = outcome.selected(), points, "ARB download complete");
        Ok(outcome)
    }

    /// Send the data block, wait for the device to ingest it and check the
    /// error queue.
    ///
    /// Entries already queued are logged and dropped under the same lock as
    /// the send. The session is free during the ingest wait; the pipeline's
    /// periodic drain stands down while a download is running.
    fn stage_volatile(&self, block: &str) -> Result<()> {
        self.transaction(|d| {
            d.discard_stale_errors()?;
            d.send_block(block)
        })?;
        std::thread::sleep(self.options().ingest_delay);

        let reply = self.query(scpi::SYST_ERR)?;
        if reply.is_empty() {
            self.set_last_error("No response to SYST:ERR? after data block");
            return Err(FgenError::Timeout(
                "no response to SYST:ERR? after data block".into(),
            ));
        }
        if scpi::is_no_error(&reply) {
            return Ok(());
        }
        let parsed = scpi::ErrorReply::parse(&reply);
        self.set_last_error(reply.as_str());
        self.log(&format!("[DEVICE ERROR] DATA VOLATILE -> {}", reply));
        Err(FgenError::Device {
            command: "DATA VOLATILE".into(),
            code: parsed.as_ref().map_or(-1, |e| e.code),
            message: parsed.map_or(reply, |e| e.message),
        })
    }

    /// Log and drop errors left by earlier unchecked writes.
    fn discard_stale_errors(&self) -> Result<()> {
        for err in self.drain_errors(COPY_ERROR_DRAIN)? {
            debug!(code = err.code, message = %err.message, "Discarding stale device error");
            self.log(&format!(
                "[DEVICE ERROR] before ARB transfer -> {},\"{}\"",
                err.code, err.message
            ));
        }
        Ok(())
    }

    /// Free a slot up front if memory is full and `name` is not already
    /// stored, so the copy does not fail with +781.
    fn make_room(&self, name: &str) -> Result<()> {
        let free = self.free_slots()?;
        let catalog = Catalog::from_names(self.nonvolatile_catalog()?);
        if free != Some(0) || catalog.contains_user(name) {
            return Ok(());
        }

        // An active user ARB cannot be deleted
        tolerate(self.set_waveform(Waveform::Sine))?;
        match catalog.first_deletable() {
            Some(victim) => {
                info!(victim, name, "Non-volatile memory full; deleting to make room");
                self.log(&format!("ARB memory full; deleting {} to store {}", victim, name));
                tolerate(self.write(&format!("DATA:DELete {}", victim)))
            }
            None => {
                warn!(name, "Non-volatile memory full and nothing deletable");
                Ok(())
            }
        }
    }

    /// After a +781: drop `name` itself if stored, else the first deletable
    /// user waveform.
    fn evict_for(&self, name: &str) -> Result<()> {
        let catalog = Catalog::from_names(self.nonvolatile_catalog()?);
        let victim = if catalog.contains_user(name) {
            Some(name.to_string())
        } else {
            catalog.first_deletable().map(str::to_string)
        };
        match victim {
            Some(victim) => {
                self.log(&format!("ARB memory full; deleting {}", victim));
                tolerate(self.delete_arb(&victim))
            }
            None => Ok(()),
        }
    }

    /// Copy VOLATILE into `name` and read back the error queue and catalog
    /// under one lock.
    fn copy_and_verify(&self, name: &str) -> Result<CopyAttempt> {
        let command = format!("DATA:COPY {},VOLATILE", name);
        self.transaction(|d| {
            d.discard_stale_errors()?;
            d.write_fast(&command)?;

            let errors = d.drain_errors(COPY_ERROR_DRAIN)?;
            for err in &errors {
                let line = format!("{},\"{}\"", err.code, err.message);
                d.set_last_error(line.as_str());
                d.log(&format!("[DEVICE ERROR] {} -> {}", command, line));
            }
            let memory_code = errors
                .iter()
                .map(|e| e.code)
                .find(|code| codes::is_memory_error(*code));

            let present = Catalog::from_names(d.nonvolatile_catalog()?).contains_user(name);
            debug!(name, present, code = ?memory_code, "Copy verified against catalog");
            Ok(CopyAttempt {
                present,
                memory_code,
            })
        })
    }
}
