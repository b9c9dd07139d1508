//! Enumerated settings of the 33120A.
//!
//! Each enum knows its SCPI token and a small integer index, which is how
//! hosts represent choice parameters and how the command pipeline stores them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use fgen_core::FgenError;

macro_rules! scpi_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// SCPI token sent on the wire.
            pub fn scpi(self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }

            pub fn index(self) -> usize {
                Self::ALL.iter().position(|v| *v == self).unwrap_or(0)
            }

            pub fn from_index(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.scpi())
            }
        }

        impl FromStr for $name {
            type Err = FgenError;

            /// Accepts the SCPI token or the variant name, case-insensitively.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| {
                        v.scpi().eq_ignore_ascii_case(wanted)
                            || format!("{:?}", v).eq_ignore_ascii_case(wanted)
                    })
                    .ok_or_else(|| {
                        FgenError::InvalidParameter(format!(
                            "'{}' is not a valid {}",
                            s,
                            stringify!($name)
                        ))
                    })
            }
        }
    };
}

scpi_enum! {
    /// Carrier shape.
    Waveform {
        Sine => "SIN",
        Square => "SQU",
        Triangle => "TRI",
        Ramp => "RAMP",
        Noise => "NOIS",
        Dc => "DC",
        /// The selected arbitrary waveform.
        User => "USER",
    }
}

scpi_enum! {
    /// AM modulation source.
    AmSource {
        Both => "BOTH",
        External => "EXT",
    }
}

scpi_enum! {
    /// FM, FSK and burst source.
    ModSource {
        Internal => "INT",
        External => "EXT",
    }
}

scpi_enum! {
    /// Shape of the internal modulating signal.
    ModShape {
        Sine => "SIN",
        Square => "SQU",
        Triangle => "TRI",
        Ramp => "RAMP",
        Noise => "NOIS",
        User => "USER",
    }
}

scpi_enum! {
    TriggerSource {
        Immediate => "IMM",
        External => "EXT",
        Bus => "BUS",
    }
}

scpi_enum! {
    /// Low-frequency modulator shape.
    LfoShape {
        Sine => "SINE",
        Triangle => "TRI",
        Square => "SQUARE",
        Ramp => "RAMP",
    }
}

scpi_enum! {
    /// Parameters a low-frequency modulator may drive.
    LiveTarget {
        Frequency => "FREQUENCY",
        Amplitude => "AMPLITUDE",
        DutyCycle => "DUTY",
        AmDepth => "AM_DEPTH",
        FmDeviation => "FM_DEV",
    }
}
