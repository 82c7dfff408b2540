//! # Recorder
//!
//! Control-thread side of a take. While recording, enriched frames are
//! converted to recording-relative [`RawFrame`]s and buffered. Stopping runs
//! the offline chain over the buffer:
//!
//! ```text
//! frames -> segment -> smooth -> quantize
//! ```
//!
//! The raw frame buffer is discarded afterwards; only the `recorded` (smoothed)
//! and `quantized` note lists survive until the next take or [`Recorder::clear`].

use crate::config::{self, RecorderConfig};
use crate::player::{self, AudioScheduler, Waveform};
use crate::quantizer::{self, Grid};
use crate::segmenter::{self, FramePitch, RawFrame};
use crate::smoother;
use crate::tuning;
use crate::{Frame, NoteEvent};

/// Weight of the previous level in the per-frame RMS smoothing.
pub const RMS_SMOOTHING: f32 = 0.3;
/// Levels are clamped here before smoothing so digital silence does not
/// swamp the first voiced frame after it.
pub const RMS_FLOOR_DB: f32 = -100.0;

/// Converts frames into recording-relative raw frames.
#[derive(Debug, Clone)]
struct FrameBuilder {
    t0: f64,
    latency_ms: f64,
    scale: Option<Vec<tuning::PitchClass>>,
    smoothed_rms_db: Option<f32>,
}

impl FrameBuilder {
    fn new(t0: f64, config: &RecorderConfig) -> FrameBuilder {
        FrameBuilder {
            t0,
            latency_ms: config.latency_ms,
            scale: config.scale.clone().filter(|s| !s.is_empty()),
            smoothed_rms_db: None,
        }
    }

    /// `None` for frames captured before the recording started.
    fn build(&mut self, frame: &Frame) -> Option<RawFrame> {
        let t = frame.time();
        if t < self.t0 {
            return None;
        }
        let t_ms = ((t - self.t0) * 1000.0 - self.latency_ms).max(0.0);

        let (pitch, rms_db, clarity) = match frame {
            Frame::Pitch(event) => (self.pitch_of(event.frequency, event.cents), event.rms_db, event.clarity),
            Frame::Level(level) => (None, level.rms_db, 0.0),
        };

        Some(RawFrame {
            t_ms,
            pitch,
            rms_db: self.smooth_rms(rms_db),
            clarity,
        })
    }

    fn pitch_of(&self, freq: f32, cents: f32) -> Option<FramePitch> {
        let midi = tuning::frequency_to_midi(freq)?;
        let Some(scale) = &self.scale else {
            let info = tuning::describe_midi(midi);
            return Some(FramePitch {
                midi,
                note: info.pitch_class,
                octave: info.octave,
                freq,
                cents,
            });
        };

        let snapped = tuning::snap_to_scale(midi, scale);
        let info = tuning::describe_midi(snapped);
        Some(FramePitch {
            midi: snapped,
            note: info.pitch_class,
            octave: info.octave,
            freq,
            cents: (100.0 * (midi - snapped)).clamp(-50.0, 50.0),
        })
    }

    fn smooth_rms(&mut self, rms_db: f32) -> f32 {
        let rms_db = rms_db.max(RMS_FLOOR_DB);
        let smoothed = match self.smoothed_rms_db {
            Some(prev) => RMS_SMOOTHING * prev + (1.0 - RMS_SMOOTHING) * rms_db,
            None => rms_db,
        };
        self.smoothed_rms_db = Some(smoothed);
        smoothed
    }
}

/// One take in progress.
#[derive(Debug, Clone)]
struct Session {
    builder: FrameBuilder,
    frames: Vec<RawFrame>,
}

/// Records frames and turns them into notes.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    config: RecorderConfig,
    session: Option<Session>,
    recorded: Vec<NoteEvent>,
    quantized: Vec<NoteEvent>,
    waveform: Waveform,
}

impl Recorder {
    pub fn new(mut config: RecorderConfig) -> Recorder {
        config.sanitize();
        Recorder {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Smoothed notes of the last take.
    pub fn recorded(&self) -> &[NoteEvent] {
        &self.recorded
    }

    /// Quantized notes of the last take.
    pub fn quantized(&self) -> &[NoteEvent] {
        &self.quantized
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    /// Starts a take whose zero is `t0` seconds on the capture clock.
    /// Restarting discards the take in progress.
    pub fn start(&mut self, t0: f64) {
        if self.session.is_some() {
            log::warn!("recording restarted at {t0:.3} s; discarding the take in progress");
        }
        self.session = Some(Session {
            builder: FrameBuilder::new(t0, &self.config),
            frames: Vec::new(),
        });
        log::info!("recording started at {t0:.3} s");
    }

    /// Buffers a frame. Ignored when not recording.
    pub fn push_frame(&mut self, frame: &Frame) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(raw) = session.builder.build(frame) {
            session.frames.push(raw);
        }
    }

    /// Ends the take at `now` seconds and runs segmentation, cleanup and
    /// quantization. Frames stamped after `now` are ignored. Does nothing
    /// when not recording.
    pub fn stop(&mut self, now: f64) {
        let Some(session) = self.session.take() else {
            return;
        };
        let end_ms = ((now - session.builder.t0) * 1000.0).max(0.0);
        let frames: Vec<RawFrame> = session.frames.into_iter().filter(|f| f.t_ms <= end_ms).collect();

        let raw = segmenter::segment(&frames, &self.config);
        let raw_count = raw.len();
        self.recorded = smoother::smooth(raw, &self.config);
        self.requantize();
        log::info!(
            "recording stopped: {} frames, {} raw notes, {} after cleanup",
            frames.len(),
            raw_count,
            self.recorded.len()
        );
    }

    /// Sets the tempo, clamped to 40..=240 bpm.
    pub fn set_tempo(&mut self, bpm: f64) {
        self.config.tempo = config::clamp_tempo(bpm);
        self.on_grid_change();
    }

    /// Sets the grid subdivisions per beat.
    pub fn set_grid(&mut self, ticks_per_beat: u32) {
        self.config.grid = config::clamp_grid(ticks_per_beat);
        self.on_grid_change();
    }

    /// Sets the swing amount, clamped to 0..=0.6.
    pub fn set_swing(&mut self, amount: f64) {
        self.config.swing = config::clamp_swing(amount);
        self.on_grid_change();
    }

    /// Discards the notes and any take in progress.
    pub fn clear(&mut self) {
        self.session = None;
        self.recorded.clear();
        self.quantized.clear();
    }

    /// Schedules the quantized notes, or the recorded ones when nothing is
    /// quantized, starting at `when` (default: the scheduler's current time).
    /// Returns the number of voices scheduled.
    pub fn play(&self, scheduler: &mut dyn AudioScheduler, when: Option<f64>) -> usize {
        let notes = if self.quantized.is_empty() {
            &self.recorded
        } else {
            &self.quantized
        };
        player::schedule_notes(notes, scheduler, when, self.waveform)
    }

    pub fn grid(&self) -> Grid {
        Grid {
            tempo: self.config.tempo,
            grid: self.config.grid,
            swing: self.config.swing,
        }
    }

    fn on_grid_change(&mut self) {
        // A take in progress picks up the new grid when it stops.
        if !self.is_recording() {
            self.requantize();
        }
    }

    fn requantize(&mut self) {
        self.quantized = quantizer::quantize(&self.recorded, &self.grid());
    }
}

#[cfg(test)]
mod test_recorder {
    use super::*;
    use crate::player::OfflineRenderer;
    use crate::tuning::PitchClass;
    use crate::{LevelFrame, PitchEvent};

    const HOP_S: f64 = 0.01;

    fn pitch(t: f64, frequency: f32, rms_db: f32) -> Frame {
        let info = tuning::describe(frequency).unwrap();
        Frame::Pitch(PitchEvent {
            t,
            frequency,
            clarity: 0.95,
            rms_db,
            note: info.pitch_class,
            octave: info.octave,
            cents: info.cents,
        })
    }

    fn level(t: f64, rms_db: f32) -> Frame {
        Frame::Level(LevelFrame { t, rms_db })
    }

    /// Pushes `count` hops of `make(t)` starting at `t`; returns the next `t`.
    fn push_run(recorder: &mut Recorder, t: f64, count: usize, make: impl Fn(f64) -> Frame) -> f64 {
        for i in 0..count {
            recorder.push_frame(&make(t + i as f64 * HOP_S));
        }
        t + count as f64 * HOP_S
    }

    #[test]
    fn frames_outside_a_take_are_ignored() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        push_run(&mut recorder, 0.0, 50, |t| pitch(t, 440.0, -20.0));
        recorder.stop(1.0);
        assert!(recorder.recorded().is_empty());
        assert!(recorder.quantized().is_empty());
    }

    #[test]
    fn empty_take_yields_no_notes() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        recorder.stop(2.0);
        assert!(!recorder.is_recording());
        assert!(recorder.recorded().is_empty());
    }

    #[test]
    fn two_pitches_become_two_notes() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(10.0);
        let t = push_run(&mut recorder, 10.0, 50, |t| pitch(t, 220.0, -20.0));
        let t = push_run(&mut recorder, t, 50, |t| pitch(t, 330.0, -20.0));
        let t = push_run(&mut recorder, t, 20, |t| level(t, -90.0));
        recorder.stop(t);

        let notes = recorder.recorded();
        assert_eq!(notes.len(), 2, "{notes:?}");
        assert_eq!((notes[0].note, notes[0].octave), (PitchClass::A, 3));
        assert_eq!((notes[1].note, notes[1].octave), (PitchClass::E, 4));
        assert!(notes[0].start_ms.abs() < 1e-6);
        assert!((notes[1].start_ms - 500.0).abs() < 1e-6);
        assert_eq!(recorder.quantized().len(), 2);
    }

    #[test]
    fn attack_splits_a_repeated_pitch() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 40, |t| pitch(t, 440.0, -30.0));
        // A clearly louder re-articulation, detected a little sharper.
        let t = push_run(&mut recorder, t, 40, |t| pitch(t, 441.5, -20.0));
        recorder.stop(t);

        let notes = recorder.recorded();
        assert_eq!(notes.len(), 2, "{notes:?}");
        assert!(notes.iter().all(|n| n.note == PitchClass::A && n.octave == 4));
        assert!(notes[1].velocity > notes[0].velocity);
    }

    #[test]
    fn latency_shifts_frames_earlier() {
        let config = RecorderConfig {
            latency_ms: 100.0,
            ..Default::default()
        };
        let mut recorder = Recorder::new(config);
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 30, |t| level(t, -90.0));
        let t = push_run(&mut recorder, t, 40, |t| pitch(t, 440.0, -20.0));
        recorder.stop(t);
        assert!((recorder.recorded()[0].start_ms - 200.0).abs() < 1e-6);
    }

    #[test]
    fn scale_snaps_the_note() {
        let config = RecorderConfig {
            scale: Some(vec![PitchClass::C, PitchClass::E, PitchClass::G]),
            ..Default::default()
        };
        let mut recorder = Recorder::new(config);
        recorder.start(0.0);
        // 340 Hz rounds to F4, which is outside the scale; E4 is the nearest member.
        let t = push_run(&mut recorder, 0.0, 40, |t| pitch(t, 340.0, -20.0));
        recorder.stop(t);
        let note = &recorder.recorded()[0];
        assert_eq!((note.note, note.octave), (PitchClass::E, 4));
        assert_eq!(note.frequency, 340.0);
    }

    #[test]
    fn tempo_is_clamped_and_requantizes() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 4, |t| level(t, -90.0));
        let t = push_run(&mut recorder, t, 60, |t| pitch(t, 440.0, -20.0));
        recorder.stop(t);
        assert!((recorder.recorded()[0].start_ms - 40.0).abs() < 1e-6);
        // 120 bpm, four ticks per beat: 125 ms ticks, 40 ms snaps to 0.
        assert_eq!(recorder.quantized()[0].start_ms, 0.0);

        recorder.set_tempo(1000.0);
        assert_eq!(recorder.config().tempo, 240.0);
        recorder.set_grid(16);
        // 240 bpm, sixteen ticks: 15.625 ms ticks, 40 ms snaps to 46.875.
        assert_eq!(recorder.quantized()[0].start_ms, 46.875);

        recorder.set_swing(2.0);
        assert_eq!(recorder.config().swing, 0.6);
    }

    #[test]
    fn grid_changes_wait_for_the_take_to_stop() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 4, |t| level(t, -90.0));
        let t = push_run(&mut recorder, t, 60, |t| pitch(t, 440.0, -20.0));
        recorder.stop(t);

        recorder.start(t);
        recorder.set_grid(16);
        assert_eq!(recorder.quantized()[0].start_ms, 0.0);
    }

    #[test]
    fn clear_discards_everything() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 40, |t| pitch(t, 440.0, -20.0));
        recorder.stop(t);
        assert!(!recorder.recorded().is_empty());
        recorder.clear();
        assert!(recorder.recorded().is_empty());
        assert!(recorder.quantized().is_empty());
    }

    #[test]
    fn play_schedules_quantized_notes() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 50, |t| pitch(t, 220.0, -20.0));
        let t = push_run(&mut recorder, t, 50, |t| pitch(t, 330.0, -20.0));
        recorder.stop(t);

        let mut renderer = OfflineRenderer::new(48_000);
        let voices = recorder.play(&mut renderer, Some(0.0));
        assert_eq!(voices, 2);
        let audio = renderer.render(1.2);
        assert!(audio.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn waveform_selects_the_oscillator() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start(0.0);
        let t = push_run(&mut recorder, 0.0, 50, |t| pitch(t, 220.0, -20.0));
        recorder.stop(t);

        let render = |recorder: &Recorder| {
            let mut renderer = OfflineRenderer::new(48_000);
            recorder.play(&mut renderer, Some(0.0));
            renderer.render(0.5)
        };
        let triangle = render(&recorder);
        recorder.set_waveform(Waveform::Sine);
        let sine = render(&recorder);
        assert!(sine.iter().any(|s| s.abs() > 0.1));
        assert_ne!(triangle, sine);
    }
}
