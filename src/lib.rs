//! # fgen
//!
//! Host-side control of an HP/Agilent 33120A function and arbitrary waveform
//! generator over GPIB. The instrument-control core lives in the member
//! crates; this crate is the glue a host (plugin, CLI, test bench) sits on.
//!
//! ## Crate Structure
//!
//! - **`fgen-core`**: errors, figment configuration, tracing setup, message-loop dispatch
//! - **`fgen-visa`**: dynamically bound VISA transport
//! - **`fgen-driver-hp33120a`**: SCPI driver, command pipeline, ARB pipeline, LFOs, simulator
//! - **`instrument`** (here): [`Instrument`], every component of one generator with ordered shutdown
//! - **`midi`** (here): note-on to carrier frequency

pub mod instrument;
pub mod midi;

pub use instrument::Instrument;
pub use midi::{note_to_frequency, NoteOn};
