//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, every key optional)
//! 2. environment variables prefixed with `FGEN_`, nested keys separated by
//!    a double underscore (`FGEN_INSTRUMENT__RESOURCE=GPIB0::12::INSTR`)
//!
//! # Example
//! ```no_run
//! use fgen_core::config::FgenConfig;
//!
//! let config = FgenConfig::load_from("fgen.toml")?;
//! config.validate()?;
//! println!("Resource: {}", config.instrument.resource);
//! # Ok::<(), fgen_core::FgenError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FgenError, Result};

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "FGEN_";

/// Smallest and largest ARB point counts the instrument accepts.
pub const MIN_ARB_POINTS: usize = 8;
pub const MAX_ARB_POINTS: usize = 16_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FgenConfig {
    pub instrument: InstrumentConfig,
    pub pipeline: PipelineConfig,
    pub arb: ArbConfig,
    pub midi: MidiConfig,
    pub logging: LoggingConfig,
}

/// Session and driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// VISA resource string, passed through to the transport untouched.
    pub resource: String,
    /// Explicit path to the VISA shared library, tried before the platform defaults.
    pub library: Option<PathBuf>,
    /// Per-operation timeout for ordinary traffic.
    pub timeout_ms: u64,
    /// Timeout used while the ARB data block is on the wire.
    pub upload_timeout_ms: u64,
    /// Echo every checked write and its error-queue response to the log sink.
    pub echo_checked_writes: bool,
    /// Report timeouts on error-queue reads.
    pub verbose: bool,
}

/// Command pipeline worker timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub wake_interval_ms: u64,
    pub error_drain_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Automation throttle window per parameter kind.
    pub throttle_ms: u64,
}

/// ARB pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbConfig {
    pub default_points: usize,
    /// Pause after the data block so the instrument can ingest it.
    pub ingest_delay_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub slot_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Frequency of MIDI note 69 (A4).
    pub reference_hz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            resource: "GPIB0::10::INSTR".to_string(),
            library: None,
            timeout_ms: 500,
            upload_timeout_ms: 10_000,
            echo_checked_writes: true,
            verbose: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wake_interval_ms: 100,
            error_drain_interval_ms: 500,
            shutdown_timeout_ms: 1000,
            throttle_ms: 20,
        }
    }
}

impl Default for ArbConfig {
    fn default() -> Self {
        Self {
            default_points: 1024,
            ingest_delay_ms: 500,
            shutdown_timeout_ms: 5000,
            slot_names: ["MYARB", "ARB_2", "ARB_3", "CUSTOM"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            reference_hz: 440.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl InstrumentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }

    pub fn error_drain_interval(&self) -> Duration {
        Duration::from_millis(self.error_drain_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

impl ArbConfig {
    pub fn ingest_delay(&self) -> Duration {
        Duration::from_millis(self.ingest_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl FgenConfig {
    /// Defaults merged with `FGEN_` environment overrides only.
    pub fn load() -> Result<Self> {
        Ok(Self::figment().merge(Self::env()).extract()?)
    }

    /// Load configuration from a specific TOML file plus environment overrides.
    ///
    /// A missing file is not an error; every key falls back to its default.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Self::env())
            .extract()?)
    }

    /// Render the effective configuration as TOML, suitable for `load_from`.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FgenError::Config(format!("Failed to serialize configuration: {}", e)))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(FgenConfig::default()))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(FgenError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(FgenError::Config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.instrument.resource.trim().is_empty() {
            return Err(FgenError::Config("instrument.resource is empty".into()));
        }

        for (key, value) in [
            ("instrument.timeout_ms", self.instrument.timeout_ms),
            ("instrument.upload_timeout_ms", self.instrument.upload_timeout_ms),
            ("pipeline.wake_interval_ms", self.pipeline.wake_interval_ms),
            ("pipeline.error_drain_interval_ms", self.pipeline.error_drain_interval_ms),
            ("pipeline.shutdown_timeout_ms", self.pipeline.shutdown_timeout_ms),
            ("pipeline.throttle_ms", self.pipeline.throttle_ms),
            ("arb.shutdown_timeout_ms", self.arb.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(FgenError::Config(format!("{} must be non-zero", key)));
            }
        }

        if !(20..=50).contains(&self.pipeline.throttle_ms) {
            tracing::warn!(
                throttle_ms = self.pipeline.throttle_ms,
                "Automation throttle outside the 20-50 ms window"
            );
        }

        if !(MIN_ARB_POINTS..=MAX_ARB_POINTS).contains(&self.arb.default_points) {
            return Err(FgenError::Config(format!(
                "arb.default_points {} outside {}..={}",
                self.arb.default_points, MIN_ARB_POINTS, MAX_ARB_POINTS
            )));
        }

        if self.arb.slot_names.len() != 4 {
            return Err(FgenError::Config(format!(
                "arb.slot_names must list exactly 4 names, got {}",
                self.arb.slot_names.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for name in &self.arb.slot_names {
            if !seen.insert(name.to_uppercase()) {
                return Err(FgenError::Config(format!("Duplicate ARB slot name: {}", name)));
            }
        }

        if !(self.midi.reference_hz.is_finite() && self.midi.reference_hz > 0.0) {
            return Err(FgenError::Config(format!(
                "midi.reference_hz must be positive, got {}",
                self.midi.reference_hz
            )));
        }

        Ok(())
    }
}
