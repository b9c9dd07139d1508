//! MIDI note-on to carrier frequency.
//!
//! Equal temperament around a configurable A4 (note 69). Results are rounded
//! so the value shown to the user matches what is sent: two decimals below
//! 1 Hz, one decimal below 1 kHz, whole hertz above.

/// MIDI note number of the reference pitch.
pub const REFERENCE_NOTE: u8 = 69;

/// Note-on event as delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteOn {
    pub note: u8,
    pub velocity: u8,
}

impl NoteOn {
    /// Frequency for this event; `None` for velocity 0 (a note-off in disguise).
    pub fn frequency(&self, reference_hz: f64) -> Option<f64> {
        (self.velocity > 0).then(|| note_to_frequency(self.note, reference_hz))
    }
}

pub fn note_to_frequency(note: u8, reference_hz: f64) -> f64 {
    let semitones = f64::from(i16::from(note) - i16::from(REFERENCE_NOTE));
    round_for_device(reference_hz * (semitones / 12.0).exp2())
}

pub fn round_for_device(hz: f64) -> f64 {
    if hz < 1.0 {
        (hz * 100.0).round() / 100.0
    } else if hz < 1e3 {
        (hz * 10.0).round() / 10.0
    } else {
        hz.round()
    }
}

/// `440.000 Hz`, `1.047 kHz`, `12.544 MHz`.
pub fn format_frequency(hz: f64) -> String {
    if hz >= 1e6 {
        format!("{:.3} MHz", hz / 1e6)
    } else if hz >= 1e3 {
        format!("{:.3} kHz", hz / 1e3)
    } else {
        format!("{:.3} Hz", hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_and_octaves() {
        assert_eq!(note_to_frequency(69, 440.0), 440.0);
        assert_eq!(note_to_frequency(81, 440.0), 880.0);
        assert_eq!(note_to_frequency(57, 440.0), 220.0);
        assert_eq!(note_to_frequency(69, 432.0), 432.0);
    }

    #[test]
    fn rounding_depends_on_magnitude() {
        // Middle C: 261.6256 Hz
        assert_eq!(note_to_frequency(60, 440.0), 261.6);
        // C8: 4186.009 Hz
        assert_eq!(note_to_frequency(108, 440.0), 4186.0);
        // Note 0: 8.1758 Hz
        assert_eq!(note_to_frequency(0, 440.0), 8.2);
        assert_eq!(round_for_device(0.123_4), 0.12);
    }

    #[test]
    fn zero_velocity_is_ignored() {
        let off = NoteOn { note: 60, velocity: 0 };
        assert_eq!(off.frequency(440.0), None);
        let on = NoteOn { note: 69, velocity: 100 };
        assert_eq!(on.frequency(440.0), Some(440.0));
    }

    #[test]
    fn display_units() {
        assert_eq!(format_frequency(440.0), "440.000 Hz");
        assert_eq!(format_frequency(4186.0), "4.186 kHz");
        assert_eq!(format_frequency(15e6), "15.000 MHz");
    }
}
