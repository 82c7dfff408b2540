//! # Musical Tuning Module
//!
//! Maps detected frequencies onto equal-tempered notes (A4 = 440 Hz) for
//! display and segmentation.
//!
//! ## Features
//! - Frequency to continuous MIDI pitch and back
//! - Pitch-class, octave and cent deviation of a frequency
//! - Pitch-class names with sharps or flats (e.g. "C#", "Db")
//! - Snapping a pitch onto the nearest member of a scale

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Reference pitch for A4.
pub const A4_FREQUENCY: f32 = 440.0;
/// MIDI note number of A4.
pub const A4_MIDI: f32 = 69.0;

/// One of the twelve equal-tempered pitch classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

const PITCH_CLASSES: [PitchClass; 12] = [
    PitchClass::C,
    PitchClass::CSharp,
    PitchClass::D,
    PitchClass::DSharp,
    PitchClass::E,
    PitchClass::F,
    PitchClass::FSharp,
    PitchClass::G,
    PitchClass::GSharp,
    PitchClass::A,
    PitchClass::ASharp,
    PitchClass::B,
];

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Accepted spellings, sharps and flats, mapped to their pitch class.
static NAME_MAP: Lazy<BTreeMap<&'static str, PitchClass>> = Lazy::new(|| {
    const FLAT_NAMES: [(&str, PitchClass); 7] = [
        ("Db", PitchClass::CSharp),
        ("Eb", PitchClass::DSharp),
        ("Gb", PitchClass::FSharp),
        ("Ab", PitchClass::GSharp),
        ("Bb", PitchClass::ASharp),
        ("Cb", PitchClass::B),
        ("Fb", PitchClass::E),
    ];
    NOTE_NAMES
        .iter()
        .copied()
        .zip(PITCH_CLASSES)
        .chain(FLAT_NAMES)
        .chain([("E#", PitchClass::F), ("B#", PitchClass::C)])
        .collect()
});

impl PitchClass {
    /// Pitch class of a semitone index, C = 0. Wraps in both directions.
    pub fn from_index(index: i32) -> PitchClass {
        PITCH_CLASSES[index.rem_euclid(12) as usize]
    }

    /// Semitones above C.
    pub fn index(self) -> i32 {
        self as i32
    }

    /// Canonical name, spelled with sharps.
    pub fn name(self) -> &'static str {
        NOTE_NAMES[self as usize]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NAME_MAP
            .get(s.trim())
            .copied()
            .ok_or_else(|| format!("unknown pitch class: {s:?}"))
    }
}

impl Serialize for PitchClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for PitchClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// The nearest equal-tempered note to a frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteInfo {
    /// Nearest MIDI note number.
    pub midi: i32,
    pub pitch_class: PitchClass,
    pub octave: i32,
    /// Deviation from the nearest note, -50..=50.
    pub cents: f32,
}

/// Converts a frequency in Hz to a continuous MIDI pitch.
///
/// # Returns
/// * `Some(midi)` - Fractional MIDI pitch (69.0 is A4)
/// * `None` - Frequency was zero, negative or not finite
pub fn frequency_to_midi(freq: f32) -> Option<f32> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    let midi = A4_MIDI + 12.0 * (freq / A4_FREQUENCY).log2();
    midi.is_finite().then_some(midi)
}

/// Converts a (possibly fractional) MIDI pitch to a frequency in Hz.
pub fn midi_to_frequency(midi: f32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) / 12.0)
}

/// Pitch class and octave of a MIDI note number. Octave 4 starts at middle C (60).
pub fn note_from_midi(midi: i32) -> (PitchClass, i32) {
    (PitchClass::from_index(midi), midi.div_euclid(12) - 1)
}

/// MIDI note number of a pitch class in an octave.
pub fn midi_from_note(pitch_class: PitchClass, octave: i32) -> i32 {
    (octave + 1) * 12 + pitch_class.index()
}

/// Finds the closest note to a frequency and how far off it is.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
///
/// # Returns
/// * `Some(info)` - Nearest note and cent deviation
/// * `None` - No usable frequency
pub fn describe(freq: f32) -> Option<NoteInfo> {
    let midi = frequency_to_midi(freq)?;
    Some(describe_midi(midi))
}

/// Same as [`describe`] for a continuous MIDI pitch.
pub fn describe_midi(midi: f32) -> NoteInfo {
    let nearest = midi.round();
    let (pitch_class, octave) = note_from_midi(nearest as i32);
    NoteInfo {
        midi: nearest as i32,
        pitch_class,
        octave,
        cents: (100.0 * (midi - nearest)).clamp(-50.0, 50.0),
    }
}

/// Snaps a continuous pitch to the nearest MIDI note whose pitch class is
/// in `scale`. An empty scale leaves the pitch untouched.
pub fn snap_to_scale(midi: f32, scale: &[PitchClass]) -> f32 {
    if scale.is_empty() {
        return midi;
    }
    let base = midi.round() as i32;
    // The widest gap between scale members is under an octave, so six
    // semitones either way always reaches one.
    (0..=6)
        .flat_map(|offset| [base - offset, base + offset])
        .filter(|candidate| scale.contains(&PitchClass::from_index(*candidate)))
        .min_by(|a, b| {
            let da = (*a as f32 - midi).abs();
            let db = (*b as f32 - midi).abs();
            da.total_cmp(&db)
        })
        .map(|snapped| snapped as f32)
        .unwrap_or(midi)
}

#[cfg(test)]
mod test_tuning {
    use super::*;

    #[test]
    fn a440_is_a4() {
        let info = describe(440.0).unwrap();
        assert_eq!(info.pitch_class, PitchClass::A);
        assert_eq!(info.octave, 4);
        assert_eq!(info.midi, 69);
        assert!(info.cents.abs() < 1e-3);
    }

    #[test]
    fn middle_c_and_cents() {
        let info = describe(261.63).unwrap();
        assert_eq!(info.pitch_class, PitchClass::C);
        assert_eq!(info.octave, 4);

        // A quarter tone sharp of A4 rounds up or down but stays within 50 cents.
        let sharp = describe(440.0 * 2.0_f32.powf(0.2 / 12.0)).unwrap();
        assert_eq!(sharp.pitch_class, PitchClass::A);
        assert!((sharp.cents - 20.0).abs() < 0.01);
    }

    #[test]
    fn no_pitch_for_zero() {
        assert!(describe(0.0).is_none());
        assert!(describe(f32::NAN).is_none());
    }

    #[test]
    fn parse_names() {
        assert_eq!("Bb".parse::<PitchClass>().unwrap(), PitchClass::ASharp);
        assert_eq!("F#".parse::<PitchClass>().unwrap(), PitchClass::FSharp);
        assert!("H".parse::<PitchClass>().is_err());
    }

    #[test]
    fn negative_midi_octaves() {
        assert_eq!(note_from_midi(0), (PitchClass::C, -1));
        assert_eq!(note_from_midi(-1), (PitchClass::B, -2));
        assert_eq!(midi_from_note(PitchClass::A, 4), 69);
    }

    #[test]
    fn snap_to_c_major() {
        let c_major = [
            PitchClass::C,
            PitchClass::D,
            PitchClass::E,
            PitchClass::F,
            PitchClass::G,
            PitchClass::A,
            PitchClass::B,
        ];
        // A sharp F#4 lands on G4, a sharp E4 stays on E4.
        assert_eq!(snap_to_scale(66.3, &c_major), 67.0);
        assert_eq!(snap_to_scale(64.2, &c_major), 64.0);
        assert_eq!(snap_to_scale(61.7, &[]), 61.7);
    }
}
