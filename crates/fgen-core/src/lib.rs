//! `fgen-core`
//!
//! Shared building blocks for the fgen instrument-control crates:
//!
//! - [`error`]: [`FgenError`] and its [`ErrorKind`] classification
//! - [`config`]: Figment-backed [`FgenConfig`] (TOML file + `FGEN_` env overrides)
//! - [`logging`]: `tracing-subscriber` initialisation
//! - [`dispatch`]: message-loop [`Dispatcher`] used for every user-facing callback
//! - [`worker`]: wake-up [`Event`] and [`WorkerHandle`] with bounded join

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod worker;

pub use config::FgenConfig;
pub use dispatch::{marshal_sink, Dispatcher, Immediate, Job, LogSink, MessageLoop};
pub use error::{codes, ErrorKind, FgenError, Result};
pub use worker::{Event, WorkerHandle};
