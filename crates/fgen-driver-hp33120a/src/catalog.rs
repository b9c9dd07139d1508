//! Waveform catalog model.
//!
//! The instrument reports resident waveforms as a flat list of names. The
//! core partitions that list into standard shapes, built-in ARBs, user ARBs
//! (at most four, non-volatile) and the volatile staging buffer.

use serde::Serialize;

pub const STANDARD_SHAPES: [&str; 6] = ["SIN", "SQU", "TRI", "RAMP", "NOIS", "DC"];

/// Factory ARBs; never deletable, never user slots.
pub const BUILTIN_ARBS: [&str; 5] = ["SINC", "NEG_RAMP", "EXP_RISE", "EXP_FALL", "CARDIAC"];

pub const VOLATILE: &str = "VOLATILE";
pub const USER: &str = "USER";

/// Non-volatile user slots.
pub const USER_SLOTS: usize = 4;

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_ARBS.iter().any(|b| b.eq_ignore_ascii_case(name))
}

/// Names a user ARB may never take.
pub fn is_reserved(name: &str) -> bool {
    is_builtin(name)
        || name.eq_ignore_ascii_case(VOLATILE)
        || name.eq_ignore_ascii_case(USER)
        || STANDARD_SHAPES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Partitioned catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub standard: Vec<String>,
    pub builtin: Vec<String>,
    pub user: Vec<String>,
    pub volatile: bool,
}

impl Catalog {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Catalog::default();
        for name in names {
            let name = name.as_ref().trim().to_ascii_uppercase();
            if name.is_empty() {
                continue;
            }
            if name == VOLATILE {
                catalog.volatile = true;
            } else if name == USER {
                // Pseudo-shape, not a stored waveform
            } else if STANDARD_SHAPES.contains(&name.as_str()) {
                catalog.standard.push(name);
            } else if is_builtin(&name) {
                catalog.builtin.push(name);
            } else {
                catalog.user.push(name);
            }
        }
        catalog
    }

    pub fn contains_user(&self, name: &str) -> bool {
        self.user.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// First user ARB that may be deleted to free a slot.
    pub fn first_deletable(&self) -> Option<&str> {
        self.user
            .iter()
            .find(|n| crate::scpi::normalize_arb_name(n).is_ok())
            .map(String::as_str)
    }

    pub fn free_user_slots(&self) -> usize {
        USER_SLOTS.saturating_sub(self.user.len())
    }
}
