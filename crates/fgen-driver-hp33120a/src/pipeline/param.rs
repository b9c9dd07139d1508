//! Controllable parameters of the 33120A.
//!
//! [`ParamKind`] names a pipeline slot; [`Param`] is a kind plus its typed
//! value. Slots store values as `f64` bit patterns, so every [`Param`]
//! encodes to and decodes from a single `f64` (enum choices as their index,
//! toggles as 0/1).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use fgen_core::{FgenError, Result};

use crate::driver::Hp33120a;
use crate::types::{AmSource, ModShape, ModSource, TriggerSource, Waveform};

macro_rules! param_kinds {
    ($($kind:ident => $name:literal),+ $(,)?) => {
        /// A pipeline slot.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ParamKind {
            $($kind),+
        }

        impl ParamKind {
            pub const ALL: &'static [ParamKind] = &[$(ParamKind::$kind),+];
            pub const COUNT: usize = Self::ALL.len();

            /// Kebab-case name used on the command line and in logs.
            pub fn name(self) -> &'static str {
                match self {
                    $(ParamKind::$kind => $name),+
                }
            }
        }
    };
}

param_kinds! {
    Frequency => "frequency",
    Amplitude => "amplitude",
    Offset => "offset",
    Phase => "phase",
    DutyCycle => "duty-cycle",
    Waveform => "waveform",
    OutputEnabled => "output",
    AmEnabled => "am",
    AmDepth => "am-depth",
    AmSource => "am-source",
    AmInternalShape => "am-shape",
    AmInternalFrequency => "am-frequency",
    FmEnabled => "fm",
    FmDeviation => "fm-deviation",
    FmSource => "fm-source",
    FmInternalShape => "fm-shape",
    FmInternalFrequency => "fm-frequency",
    FskEnabled => "fsk",
    FskFrequency => "fsk-frequency",
    FskSource => "fsk-source",
    FskInternalRate => "fsk-rate",
    SweepEnabled => "sweep",
    SweepStart => "sweep-start",
    SweepStop => "sweep-stop",
    SweepTime => "sweep-time",
    BurstEnabled => "burst",
    BurstCycles => "burst-cycles",
    BurstPhase => "burst-phase",
    BurstInternalPeriod => "burst-period",
    BurstSource => "burst-source",
    SyncEnabled => "sync",
    TriggerSource => "trigger-source",
}

impl ParamKind {
    /// Position in [`ParamKind::ALL`]; the slot index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Continuous values, sent with the fast write.
    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            ParamKind::Waveform
                | ParamKind::OutputEnabled
                | ParamKind::AmEnabled
                | ParamKind::AmSource
                | ParamKind::AmInternalShape
                | ParamKind::FmEnabled
                | ParamKind::FmSource
                | ParamKind::FmInternalShape
                | ParamKind::FskEnabled
                | ParamKind::FskSource
                | ParamKind::SweepEnabled
                | ParamKind::BurstEnabled
                | ParamKind::BurstSource
                | ParamKind::SyncEnabled
                | ParamKind::TriggerSource
        )
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamKind {
    type Err = FgenError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('_', "-");
        ParamKind::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| FgenError::InvalidParameter(format!("unknown parameter '{}'", s)))
    }
}

/// A parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Param {
    Frequency(f64),
    Amplitude(f64),
    Offset(f64),
    Phase(f64),
    DutyCycle(f64),
    Waveform(Waveform),
    OutputEnabled(bool),
    AmEnabled(bool),
    AmDepth(f64),
    AmSource(AmSource),
    AmInternalShape(ModShape),
    AmInternalFrequency(f64),
    FmEnabled(bool),
    FmDeviation(f64),
    FmSource(ModSource),
    FmInternalShape(ModShape),
    FmInternalFrequency(f64),
    FskEnabled(bool),
    FskFrequency(f64),
    FskSource(ModSource),
    FskInternalRate(f64),
    SweepEnabled(bool),
    SweepStart(f64),
    SweepStop(f64),
    SweepTime(f64),
    BurstEnabled(bool),
    BurstCycles(u32),
    BurstPhase(f64),
    /// Seconds between bursts.
    BurstInternalPeriod(f64),
    BurstSource(ModSource),
    SyncEnabled(bool),
    TriggerSource(TriggerSource),
}

fn flag(value: f64) -> bool {
    value != 0.0
}

fn choice<T>(value: f64, from_index: fn(usize) -> Option<T>) -> Option<T> {
    if value.is_finite() && value >= 0.0 {
        from_index(value.round() as usize)
    } else {
        None
    }
}

impl Param {
    pub fn kind(&self) -> ParamKind {
        match self {
            Param::Frequency(_) => ParamKind::Frequency,
            Param::Amplitude(_) => ParamKind::Amplitude,
            Param::Offset(_) => ParamKind::Offset,
            Param::Phase(_) => ParamKind::Phase,
            Param::DutyCycle(_) => ParamKind::DutyCycle,
            Param::Waveform(_) => ParamKind::Waveform,
            Param::OutputEnabled(_) => ParamKind::OutputEnabled,
            Param::AmEnabled(_) => ParamKind::AmEnabled,
            Param::AmDepth(_) => ParamKind::AmDepth,
            Param::AmSource(_) => ParamKind::AmSource,
            Param::AmInternalShape(_) => ParamKind::AmInternalShape,
            Param::AmInternalFrequency(_) => ParamKind::AmInternalFrequency,
            Param::FmEnabled(_) => ParamKind::FmEnabled,
            Param::FmDeviation(_) => ParamKind::FmDeviation,
            Param::FmSource(_) => ParamKind::FmSource,
            Param::FmInternalShape(_) => ParamKind::FmInternalShape,
            Param::FmInternalFrequency(_) => ParamKind::FmInternalFrequency,
            Param::FskEnabled(_) => ParamKind::FskEnabled,
            Param::FskFrequency(_) => ParamKind::FskFrequency,
            Param::FskSource(_) => ParamKind::FskSource,
            Param::FskInternalRate(_) => ParamKind::FskInternalRate,
            Param::SweepEnabled(_) => ParamKind::SweepEnabled,
            Param::SweepStart(_) => ParamKind::SweepStart,
            Param::SweepStop(_) => ParamKind::SweepStop,
            Param::SweepTime(_) => ParamKind::SweepTime,
            Param::BurstEnabled(_) => ParamKind::BurstEnabled,
            Param::BurstCycles(_) => ParamKind::BurstCycles,
            Param::BurstPhase(_) => ParamKind::BurstPhase,
            Param::BurstInternalPeriod(_) => ParamKind::BurstInternalPeriod,
            Param::BurstSource(_) => ParamKind::BurstSource,
            Param::SyncEnabled(_) => ParamKind::SyncEnabled,
            Param::TriggerSource(_) => ParamKind::TriggerSource,
        }
    }

    /// Slot representation.
    pub fn encode(&self) -> f64 {
        let on = |b: bool| if b { 1.0 } else { 0.0 };
        match *self {
            Param::Frequency(v)
            | Param::Amplitude(v)
            | Param::Offset(v)
            | Param::Phase(v)
            | Param::DutyCycle(v)
            | Param::AmDepth(v)
            | Param::AmInternalFrequency(v)
            | Param::FmDeviation(v)
            | Param::FmInternalFrequency(v)
            | Param::FskFrequency(v)
            | Param::FskInternalRate(v)
            | Param::SweepStart(v)
            | Param::SweepStop(v)
            | Param::SweepTime(v)
            | Param::BurstPhase(v)
            | Param::BurstInternalPeriod(v) => v,
            Param::OutputEnabled(b)
            | Param::AmEnabled(b)
            | Param::FmEnabled(b)
            | Param::FskEnabled(b)
            | Param::SweepEnabled(b)
            | Param::BurstEnabled(b)
            | Param::SyncEnabled(b) => on(b),
            Param::Waveform(w) => w.index() as f64,
            Param::AmSource(s) => s.index() as f64,
            Param::AmInternalShape(s) | Param::FmInternalShape(s) => s.index() as f64,
            Param::FmSource(s) | Param::FskSource(s) | Param::BurstSource(s) => s.index() as f64,
            Param::TriggerSource(s) => s.index() as f64,
            Param::BurstCycles(n) => f64::from(n),
        }
    }

    /// Rebuild a value from its slot representation. Enum indices out of
    /// range yield `None`.
    pub fn decode(kind: ParamKind, value: f64) -> Option<Param> {
        Some(match kind {
            ParamKind::Frequency => Param::Frequency(value),
            ParamKind::Amplitude => Param::Amplitude(value),
            ParamKind::Offset => Param::Offset(value),
            ParamKind::Phase => Param::Phase(value),
            ParamKind::DutyCycle => Param::DutyCycle(value),
            ParamKind::Waveform => Param::Waveform(choice(value, Waveform::from_index)?),
            ParamKind::OutputEnabled => Param::OutputEnabled(flag(value)),
            ParamKind::AmEnabled => Param::AmEnabled(flag(value)),
            ParamKind::AmDepth => Param::AmDepth(value),
            ParamKind::AmSource => Param::AmSource(choice(value, AmSource::from_index)?),
            ParamKind::AmInternalShape => {
                Param::AmInternalShape(choice(value, ModShape::from_index)?)
            }
            ParamKind::AmInternalFrequency => Param::AmInternalFrequency(value),
            ParamKind::FmEnabled => Param::FmEnabled(flag(value)),
            ParamKind::FmDeviation => Param::FmDeviation(value),
            ParamKind::FmSource => Param::FmSource(choice(value, ModSource::from_index)?),
            ParamKind::FmInternalShape => {
                Param::FmInternalShape(choice(value, ModShape::from_index)?)
            }
            ParamKind::FmInternalFrequency => Param::FmInternalFrequency(value),
            ParamKind::FskEnabled => Param::FskEnabled(flag(value)),
            ParamKind::FskFrequency => Param::FskFrequency(value),
            ParamKind::FskSource => Param::FskSource(choice(value, ModSource::from_index)?),
            ParamKind::FskInternalRate => Param::FskInternalRate(value),
            ParamKind::SweepEnabled => Param::SweepEnabled(flag(value)),
            ParamKind::SweepStart => Param::SweepStart(value),
            ParamKind::SweepStop => Param::SweepStop(value),
            ParamKind::SweepTime => Param::SweepTime(value),
            ParamKind::BurstEnabled => Param::BurstEnabled(flag(value)),
            ParamKind::BurstCycles => {
                if !value.is_finite() || value < 0.0 {
                    return None;
                }
                Param::BurstCycles(value.round().min(f64::from(u32::MAX)) as u32)
            }
            ParamKind::BurstPhase => Param::BurstPhase(value),
            ParamKind::BurstInternalPeriod => Param::BurstInternalPeriod(value),
            ParamKind::BurstSource => Param::BurstSource(choice(value, ModSource::from_index)?),
            ParamKind::SyncEnabled => Param::SyncEnabled(flag(value)),
            ParamKind::TriggerSource => {
                Param::TriggerSource(choice(value, TriggerSource::from_index)?)
            }
        })
    }

    /// Parse a textual value for `kind`: numbers for scalars, `on`/`off`
    /// for toggles, SCPI tokens or names for choices.
    pub fn parse(kind: ParamKind, text: &str) -> Result<Param> {
        let text = text.trim();
        let invalid = || FgenError::InvalidParameter(format!("invalid value '{}' for {}", text, kind));
        let toggle = || match text.to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(1.0),
            "off" | "0" | "false" => Ok(0.0),
            _ => Err(invalid()),
        };
        let value = match kind {
            ParamKind::Waveform => text.parse::<Waveform>()?.index() as f64,
            ParamKind::AmSource => text.parse::<AmSource>()?.index() as f64,
            ParamKind::AmInternalShape | ParamKind::FmInternalShape => {
                text.parse::<ModShape>()?.index() as f64
            }
            ParamKind::FmSource | ParamKind::FskSource | ParamKind::BurstSource => {
                text.parse::<ModSource>()?.index() as f64
            }
            ParamKind::TriggerSource => text.parse::<TriggerSource>()?.index() as f64,
            k if k.is_scalar() => text.parse::<f64>().map_err(|_| invalid())?,
            _ => toggle()?,
        };
        Param::decode(kind, value).ok_or_else(invalid)
    }
}

impl Hp33120a {
    /// Apply one parameter. Scalars use the fast write; choices and toggles
    /// the checked write.
    pub fn set_param(&self, param: Param) -> Result<()> {
        match param {
            Param::Frequency(v) => self.set_frequency(v),
            Param::Amplitude(v) => self.set_amplitude(v),
            Param::Offset(v) => self.set_offset(v),
            Param::Phase(v) => self.set_phase(v),
            Param::DutyCycle(v) => self.set_duty_cycle(v),
            Param::Waveform(w) => self.set_waveform(w),
            Param::OutputEnabled(b) => self.set_output_enabled(b),
            Param::AmEnabled(b) => self.set_am_enabled(b),
            Param::AmDepth(v) => self.set_am_depth(v),
            Param::AmSource(s) => self.set_am_source(s),
            Param::AmInternalShape(s) => self.set_am_internal_shape(s),
            Param::AmInternalFrequency(v) => self.set_am_internal_frequency(v),
            Param::FmEnabled(b) => self.set_fm_enabled(b),
            Param::FmDeviation(v) => self.set_fm_deviation(v),
            Param::FmSource(s) => self.set_fm_source(s),
            Param::FmInternalShape(s) => self.set_fm_internal_shape(s),
            Param::FmInternalFrequency(v) => self.set_fm_internal_frequency(v),
            Param::FskEnabled(b) => self.set_fsk_enabled(b),
            Param::FskFrequency(v) => self.set_fsk_frequency(v),
            Param::FskSource(s) => self.set_fsk_source(s),
            Param::FskInternalRate(v) => self.set_fsk_internal_rate(v),
            Param::SweepEnabled(b) => self.set_sweep_enabled(b),
            Param::SweepStart(v) => self.set_sweep_start(v),
            Param::SweepStop(v) => self.set_sweep_stop(v),
            Param::SweepTime(v) => self.set_sweep_time(v),
            Param::BurstEnabled(b) => self.set_burst_enabled(b),
            Param::BurstCycles(n) => self.set_burst_cycles(n),
            Param::BurstPhase(v) => self.set_burst_phase(v),
            Param::BurstInternalPeriod(v) => self.set_burst_internal_period(v),
            Param::BurstSource(s) => self.set_burst_source(s),
            Param::SyncEnabled(b) => self.set_sync_enabled(b),
            Param::TriggerSource(s) => self.set_trigger_source(s),
        }
    }
}
