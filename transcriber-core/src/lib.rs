// transcriber-core/src/lib.rs

//! The core logic for the monophonic pitch-to-note transcriber.
//! This crate is responsible for audio capture, streaming pitch detection,
//! note segmentation, cleanup, quantization and playback. It is completely
//! headless and contains no UI code.
//!
//! Two execution contexts cooperate:
//! - the audio thread runs [`analyzer::StreamAnalyzer`] inside the capture
//!   callback and posts [`bridge::AnalysisMessage`]s;
//! - the control thread drains them through [`detector::PitchDetector`]
//!   and feeds a [`recorder::Recorder`] session.

pub mod analyzer;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod detector;
pub mod error;
pub mod pitch;
pub mod player;
pub mod quantizer;
pub mod recorder;
pub mod ring_buffer;
pub mod segmenter;
pub mod smoother;
pub mod tuning;
pub mod voicing;

use serde::{Deserialize, Serialize};

use tuning::PitchClass;

/// One voiced (or hang-extended) analysis hop, as posted by the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchFrame {
    /// Seconds on the capture clock.
    pub t: f64,
    /// Detected frequency in Hz.
    pub freq: f32,
    /// YIN clarity, 0 to 1.
    pub clarity: f32,
    /// RMS level in dBFS.
    pub rms_db: f32,
}

/// One unvoiced analysis hop; carries no pitch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelFrame {
    pub t: f64,
    pub rms_db: f32,
}

/// A [`PitchFrame`] enriched on the control thread with its nearest note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchEvent {
    pub t: f64,
    pub frequency: f32,
    pub clarity: f32,
    pub rms_db: f32,
    pub note: PitchClass,
    pub octave: i32,
    /// Deviation from `note`, -50..=50.
    pub cents: f32,
}

/// A frame as the recorder consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    Pitch(PitchEvent),
    Level(LevelFrame),
}

impl Frame {
    pub fn time(&self) -> f64 {
        match self {
            Frame::Pitch(event) => event.t,
            Frame::Level(frame) => frame.t,
        }
    }
}

/// A transcribed note.
///
/// `duration_ms` is never negative. While segmentation keeps a note open its
/// duration only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub note: PitchClass,
    pub octave: i32,
    /// Frequency as originally detected, never snapped.
    pub frequency: f32,
    pub cents: f32,
    /// Running average of frame clarity.
    pub clarity: f32,
    /// 0 to 1, the loudest articulation seen while the note was open.
    pub velocity: f32,
    pub start_ms: f64,
    pub duration_ms: f64,
}

impl NoteEvent {
    pub fn end_ms(&self) -> f64 {
        self.start_ms + self.duration_ms
    }

    /// MIDI note number of the nominal pitch.
    pub fn midi(&self) -> i32 {
        tuning::midi_from_note(self.note, self.octave)
    }

    /// Same pitch class and octave.
    pub fn same_note(&self, other: &NoteEvent) -> bool {
        self.note == other.note && self.octave == other.octave
    }

    /// Extends the note so it ends no earlier than `end_ms`.
    pub fn extend_to(&mut self, end_ms: f64) {
        self.duration_ms = self.duration_ms.max(end_ms - self.start_ms);
    }
}
