//! # Note Segmentation
//!
//! Turns a recording's frame buffer into raw note events.
//!
//! The segmenter is an explicit two-state machine:
//!
//! - **Idle**: no note open. The next voiced frame opens one.
//! - **Active**: one note open. Per frame:
//!   - same pitch (within the cents tolerance of the note): extend it. An
//!     attack (level step of at least `attack_ratio`) after `min_note_ms`
//!     of note and `min_silence_ms` since the last articulation closes it
//!     and opens a new note at the same pitch.
//!   - different pitch: accepted only when every frame in the following
//!     `min_change_ms` stays on the new pitch and the open note has lasted
//!     `min_change_ms`. Otherwise it is jitter and just extends the note.
//!   - unvoiced: extends the note up to the frame while the silence is no
//!     longer than `min_silence_ms`; past that the note closes and the
//!     machine returns to Idle.
//!
//! Frames must arrive in non-decreasing time order. They are not re-sorted.

use crate::config::RecorderConfig;
use crate::tuning::PitchClass;
use crate::NoteEvent;

/// Level mapped to velocity 0.
pub const VELOCITY_FLOOR_DB: f32 = -60.0;
/// Level mapped to velocity 1.
pub const VELOCITY_CEIL_DB: f32 = -6.0;
/// Weight of the previous value in the running clarity average.
const CLARITY_SMOOTHING: f32 = 0.9;

/// Pitch of a voiced frame, after optional scale snapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePitch {
    /// Continuous MIDI pitch; integral when snapped to a scale.
    pub midi: f32,
    pub note: PitchClass,
    pub octave: i32,
    /// Detected frequency, unsnapped.
    pub freq: f32,
    pub cents: f32,
}

/// A frame relative to the start of the recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawFrame {
    pub t_ms: f64,
    /// `None` for level-only frames.
    pub pitch: Option<FramePitch>,
    /// Smoothed level in dBFS.
    pub rms_db: f32,
    pub clarity: f32,
}

impl RawFrame {
    /// The frame's pitch if it is loud enough to count as voiced.
    fn voiced_pitch(&self, silence_db: f32) -> Option<&FramePitch> {
        self.pitch.as_ref().filter(|_| self.rms_db >= silence_db)
    }
}

/// Maps a level in dBFS onto 0..=1.
pub fn velocity_from_db(rms_db: f32) -> f32 {
    ((rms_db - VELOCITY_FLOOR_DB) / (VELOCITY_CEIL_DB - VELOCITY_FLOOR_DB)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
struct OpenNote {
    event: NoteEvent,
    /// Nominal MIDI pitch the note is compared against.
    midi: f32,
    articulated_ms: f64,
    last_voiced_ms: f64,
}

#[derive(Debug, Clone, Default)]
enum SegmenterState {
    #[default]
    Idle,
    Active(OpenNote),
}

/// Segmentation over one recording's frames.
pub struct NoteSegmenter<'a> {
    config: &'a RecorderConfig,
    state: SegmenterState,
    notes: Vec<NoteEvent>,
    prev_rms_db: Option<f32>,
}

impl<'a> NoteSegmenter<'a> {
    pub fn new(config: &'a RecorderConfig) -> NoteSegmenter<'a> {
        NoteSegmenter {
            config,
            state: SegmenterState::Idle,
            notes: Vec::new(),
            prev_rms_db: None,
        }
    }

    /// Runs the whole buffer and returns the notes in start order.
    pub fn run(mut self, frames: &[RawFrame]) -> Vec<NoteEvent> {
        for index in 0..frames.len() {
            self.step(frames, index);
        }
        self.finish()
    }

    fn finish(mut self) -> Vec<NoteEvent> {
        if let SegmenterState::Active(open) = std::mem::take(&mut self.state) {
            self.notes.push(open.event);
        }
        self.notes
    }

    /// Applies one frame. `frames` is the whole buffer so pitch changes can
    /// look ahead for stability.
    fn step(&mut self, frames: &[RawFrame], index: usize) {
        let frame = &frames[index];
        let state = std::mem::take(&mut self.state);

        self.state = match (state, frame.voiced_pitch(self.config.silence_db)) {
            (SegmenterState::Idle, None) => SegmenterState::Idle,
            (SegmenterState::Idle, Some(pitch)) => self.open(frame, pitch),
            (SegmenterState::Active(open), None) => self.on_silence(open, frame),
            (SegmenterState::Active(open), Some(pitch)) => {
                let same_pitch = (open.midi - pitch.midi).abs() <= self.config.tolerance_semitones();
                if same_pitch {
                    self.on_same_pitch(open, frame, pitch)
                } else {
                    self.on_pitch_change(open, frames, index, pitch)
                }
            }
        };

        self.prev_rms_db = Some(frame.rms_db);
    }

    fn open(&self, frame: &RawFrame, pitch: &FramePitch) -> SegmenterState {
        SegmenterState::Active(OpenNote {
            event: NoteEvent {
                note: pitch.note,
                octave: pitch.octave,
                frequency: pitch.freq,
                cents: pitch.cents,
                clarity: frame.clarity,
                velocity: velocity_from_db(frame.rms_db),
                start_ms: frame.t_ms,
                duration_ms: 0.0,
            },
            midi: pitch.midi.round(),
            articulated_ms: frame.t_ms,
            last_voiced_ms: frame.t_ms,
        })
    }

    fn close(&mut self, open: OpenNote) {
        log::debug!(
            "note {}{} at {:.0} ms for {:.0} ms",
            open.event.note,
            open.event.octave,
            open.event.start_ms,
            open.event.duration_ms
        );
        self.notes.push(open.event);
    }

    fn on_silence(&mut self, mut open: OpenNote, frame: &RawFrame) -> SegmenterState {
        if frame.t_ms - open.last_voiced_ms <= self.config.min_silence_ms {
            open.event.extend_to(frame.t_ms);
            SegmenterState::Active(open)
        } else {
            self.close(open);
            SegmenterState::Idle
        }
    }

    fn on_same_pitch(&mut self, mut open: OpenNote, frame: &RawFrame, pitch: &FramePitch) -> SegmenterState {
        let attack = self
            .prev_rms_db
            .is_some_and(|prev| frame.rms_db - prev >= self.config.attack_step_db());
        open.event.extend_to(frame.t_ms);

        if attack
            && open.event.duration_ms > self.config.min_note_ms
            && frame.t_ms - open.articulated_ms >= self.config.min_silence_ms
        {
            self.close(open);
            return self.open(frame, pitch);
        }

        open.event.clarity = CLARITY_SMOOTHING * open.event.clarity + (1.0 - CLARITY_SMOOTHING) * frame.clarity;
        open.event.velocity = open.event.velocity.max(velocity_from_db(frame.rms_db));
        open.last_voiced_ms = frame.t_ms;
        SegmenterState::Active(open)
    }

    fn on_pitch_change(
        &mut self,
        mut open: OpenNote,
        frames: &[RawFrame],
        index: usize,
        pitch: &FramePitch,
    ) -> SegmenterState {
        let frame = &frames[index];
        let candidate = pitch.midi.round();
        open.event.extend_to(frame.t_ms);
        open.last_voiced_ms = frame.t_ms;

        // Rounds onto the open note: a wide wobble, never a new note.
        if candidate == open.midi {
            return SegmenterState::Active(open);
        }

        if open.event.duration_ms >= self.config.min_change_ms && self.is_sustained(frames, index, candidate) {
            self.close(open);
            return self.open(frame, pitch);
        }
        SegmenterState::Active(open)
    }

    /// Every frame in the `min_change_ms` after `index` is voiced and within
    /// tolerance of `candidate`. At least one such frame must exist.
    fn is_sustained(&self, frames: &[RawFrame], index: usize, candidate: f32) -> bool {
        let horizon = frames[index].t_ms + self.config.min_change_ms;
        let tolerance = self.config.tolerance_semitones();
        let mut seen = 0;
        for frame in frames[index + 1..].iter().take_while(|f| f.t_ms <= horizon) {
            match frame.voiced_pitch(self.config.silence_db) {
                Some(p) if (p.midi - candidate).abs() <= tolerance => seen += 1,
                _ => return false,
            }
        }
        seen > 0
    }
}

/// Segments a frame buffer with `config`.
pub fn segment(frames: &[RawFrame], config: &RecorderConfig) -> Vec<NoteEvent> {
    NoteSegmenter::new(config).run(frames)
}

#[cfg(test)]
mod test_segmenter {
    use super::*;
    use crate::tuning;

    const HOP_MS: f64 = 10.0;

    fn voiced(t_ms: f64, midi: f32, rms_db: f32) -> RawFrame {
        let info = tuning::describe_midi(midi);
        RawFrame {
            t_ms,
            pitch: Some(FramePitch {
                midi,
                note: info.pitch_class,
                octave: info.octave,
                freq: tuning::midi_to_frequency(midi),
                cents: info.cents,
            }),
            rms_db,
            clarity: 0.95,
        }
    }

    fn silent(t_ms: f64) -> RawFrame {
        RawFrame {
            t_ms,
            pitch: None,
            rms_db: -90.0,
            clarity: 0.0,
        }
    }

    /// `(midi, duration_ms)` runs; `None` is silence.
    fn track(runs: &[(Option<f32>, f64)]) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        let mut t = 0.0;
        for &(midi, duration) in runs {
            let end = t + duration;
            while t < end {
                frames.push(match midi {
                    Some(m) => voiced(t, m, -20.0),
                    None => silent(t),
                });
                t += HOP_MS;
            }
        }
        frames
    }

    #[test]
    fn no_frames_no_notes() {
        assert!(segment(&[], &RecorderConfig::default()).is_empty());
        assert!(segment(&track(&[(None, 500.0)]), &RecorderConfig::default()).is_empty());
    }

    #[test]
    fn vibrato_inside_tolerance_is_one_note() {
        let frames: Vec<RawFrame> = (0..60)
            .map(|i| {
                let wobble = if i % 2 == 0 { 0.2 } else { -0.2 };
                voiced(i as f64 * HOP_MS, 69.0 + wobble, -20.0)
            })
            .collect();
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note, PitchClass::A);
        assert_eq!(notes[0].octave, 4);
        assert_eq!(notes[0].duration_ms, 590.0);
    }

    #[test]
    fn sustained_change_splits() {
        let frames = track(&[(Some(69.0), 300.0), (Some(72.0), 300.0)]);
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].midi(), 69);
        assert_eq!(notes[1].midi(), 72);
        assert_eq!(notes[1].start_ms, 300.0);
        assert!(notes[0].end_ms() <= notes[1].start_ms);
    }

    #[test]
    fn single_frame_jump_is_jitter() {
        let mut frames = track(&[(Some(69.0), 400.0)]);
        frames[20] = voiced(200.0, 76.0, -20.0);
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].duration_ms, 390.0);
    }

    #[test]
    fn change_waits_for_min_change_ms_of_note() {
        // The first note is only 30 ms old when the new pitch arrives, so the
        // change lands once the open note reaches 60 ms.
        let frames = track(&[(Some(69.0), 30.0), (Some(72.0), 300.0)]);
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].midi(), 69);
        assert_eq!(notes[1].start_ms, 60.0);
    }

    #[test]
    fn attack_rearticulates_same_pitch() {
        let mut frames: Vec<RawFrame> = (0..30).map(|i| voiced(i as f64 * HOP_MS, 69.0, -30.0)).collect();
        frames.extend((30..60).map(|i| voiced(i as f64 * HOP_MS, 69.0, -18.0)));
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].start_ms, 0.0);
        assert_eq!(notes[1].start_ms, 300.0);
        assert!(notes[1].velocity > notes[0].velocity);
        assert_eq!(notes[0].midi(), notes[1].midi());
    }

    #[test]
    fn early_attack_does_not_split() {
        // Louder after 50 ms: the note is shorter than min_note_ms.
        let mut frames: Vec<RawFrame> = (0..5).map(|i| voiced(i as f64 * HOP_MS, 69.0, -30.0)).collect();
        frames.extend((5..40).map(|i| voiced(i as f64 * HOP_MS, 69.0, -18.0)));
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn rearticulation_waits_for_min_silence_ms() {
        let config = RecorderConfig {
            min_note_ms: 90.0,
            min_silence_ms: 200.0,
            ..Default::default()
        };
        // Attacks at 120 ms (past min_note_ms, inside min_silence_ms) and at 400 ms.
        let mut frames: Vec<RawFrame> = (0..12).map(|i| voiced(i as f64 * HOP_MS, 69.0, -30.0)).collect();
        frames.extend((12..40).map(|i| voiced(i as f64 * HOP_MS, 69.0, -18.0)));
        frames.extend((40..60).map(|i| voiced(i as f64 * HOP_MS, 69.0, -6.0)));

        let notes = segment(&frames, &config);
        assert_eq!(notes.len(), 2, "{notes:?}");
        assert_eq!(notes[0].start_ms, 0.0);
        assert_eq!(notes[0].duration_ms, 400.0);
        assert_eq!(notes[1].start_ms, 400.0);
    }

    #[test]
    fn long_silence_closes_and_reopens() {
        let frames = track(&[(Some(69.0), 200.0), (None, 300.0), (Some(69.0), 200.0)]);
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 2);
        // Extended through the bridged part of the silence only.
        assert_eq!(notes[0].duration_ms, 250.0);
        assert_eq!(notes[1].start_ms, 500.0);
    }

    #[test]
    fn short_dropout_is_bridged() {
        // Pitch lost for 40 ms without a level change.
        let mut frames = track(&[(Some(69.0), 440.0)]);
        for frame in &mut frames[20..24] {
            frame.pitch = None;
        }
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].duration_ms, 430.0);
    }

    #[test]
    fn loud_return_after_dropout_is_a_repeated_note() {
        let frames = track(&[(Some(69.0), 200.0), (None, 40.0), (Some(69.0), 200.0)]);
        let notes = segment(&frames, &RecorderConfig::default());
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].duration_ms, 240.0);
        assert_eq!(notes[1].start_ms, 240.0);
    }

    #[test]
    fn quiet_pitch_frames_count_as_silence() {
        let frames: Vec<RawFrame> = (0..30).map(|i| voiced(i as f64 * HOP_MS, 69.0, -70.0)).collect();
        assert!(segment(&frames, &RecorderConfig::default()).is_empty());
    }

    #[test]
    fn clarity_is_running_average() {
        let mut frames = vec![voiced(0.0, 69.0, -20.0)];
        frames.push(RawFrame {
            clarity: 0.45,
            ..voiced(10.0, 69.0, -20.0)
        });
        let notes = segment(&frames, &RecorderConfig::default());
        assert!((notes[0].clarity - 0.9).abs() < 1e-5);
    }
}
