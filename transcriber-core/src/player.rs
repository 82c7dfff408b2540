//! # Playback Module
//!
//! Replays transcribed notes with one oscillator and one gain envelope per
//! note, scheduled at absolute times on an audio clock.
//!
//! Scheduling never uses wall-clock timers. Each [`Voice`] carries the
//! exact start/stop times and envelope breakpoints, and the [`VoiceMixer`]
//! evaluates them per sample against its own sample counter, so timing is
//! sample-accurate no matter when the control thread gets to run.
//!
//! ## Envelope
//! - starts at a near-zero gain at the note start
//! - linear ramp to `0.28 + 0.35 * velocity`
//! - short sustain at the peak
//! - linear ramp back to near-zero at the note's end
//! - oscillator stopped shortly after

use std::f64::consts::TAU;
use std::str::FromStr;

use crate::NoteEvent;
use crate::tuning;

pub const PEAK_BASE_GAIN: f32 = 0.28;
pub const PEAK_VELOCITY_GAIN: f32 = 0.35;
/// Gain the envelope starts from and returns to.
pub const FLOOR_GAIN: f32 = 0.0001;
pub const ATTACK_S: f64 = 0.012;
pub const SUSTAIN_S: f64 = 0.04;
/// Time between the end of the release and the oscillator stop.
pub const STOP_TAIL_S: f64 = 0.05;

/// Oscillator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    Sine,
    #[default]
    Triangle,
}

impl Waveform {
    /// One sample at `phase` cycles (only the fractional part matters).
    fn sample(self, phase: f64) -> f32 {
        let frac = phase.fract();
        match self {
            Waveform::Sine => (TAU * frac).sin() as f32,
            Waveform::Triangle => (1.0 - 4.0 * (frac - 0.5).abs()) as f32,
        }
    }
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" => Ok(Waveform::Sine),
            "triangle" => Ok(Waveform::Triangle),
            _ => Err(format!("unknown waveform: {s:?}")),
        }
    }
}

/// Linear gain automation, like a chain of `linearRampToValueAtTime` calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// `(time_s, gain)` breakpoints in time order.
    pub points: [(f64, f32); 4],
}

impl Envelope {
    pub fn gain_at(&self, t: f64) -> f32 {
        let first = self.points[0];
        if t < first.0 {
            return 0.0;
        }
        for pair in self.points.windows(2) {
            let (t0, g0) = pair[0];
            let (t1, g1) = pair[1];
            if t < t1 {
                if t1 <= t0 {
                    return g1;
                }
                let x = ((t - t0) / (t1 - t0)) as f32;
                return g0 + (g1 - g0) * x;
            }
        }
        self.points[self.points.len() - 1].1
    }

    pub fn peak(&self) -> f32 {
        self.points.iter().map(|p| p.1).fold(0.0, f32::max)
    }
}

/// One scheduled oscillator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub frequency: f32,
    pub waveform: Waveform,
    /// Absolute clock time of the oscillator start, in seconds.
    pub start: f64,
    /// Absolute clock time of the oscillator stop.
    pub stop: f64,
    pub envelope: Envelope,
}

impl Voice {
    /// Builds the voice for `note`, with the recording's zero at `when`
    /// seconds on the clock. Zero-length notes produce no voice.
    pub fn for_note(note: &NoteEvent, when: f64, waveform: Waveform) -> Option<Voice> {
        let duration = note.duration_ms / 1000.0;
        if !(duration > 0.0) {
            return None;
        }
        let start = when + note.start_ms / 1000.0;
        let end = start + duration;
        let attack_end = start + ATTACK_S.min(duration * 0.25);
        let sustain_end = attack_end + SUSTAIN_S.min(duration * 0.25);
        let peak = PEAK_BASE_GAIN + PEAK_VELOCITY_GAIN * note.velocity.clamp(0.0, 1.0);

        Some(Voice {
            frequency: tuning::midi_to_frequency(note.midi() as f32),
            waveform,
            start,
            stop: end + STOP_TAIL_S,
            envelope: Envelope {
                points: [
                    (start, FLOOR_GAIN),
                    (attack_end, peak),
                    (sustain_end, peak),
                    (end, FLOOR_GAIN),
                ],
            },
        })
    }

    fn sample_at(&self, t: f64) -> f32 {
        if t < self.start || t >= self.stop {
            return 0.0;
        }
        let phase = (t - self.start) * self.frequency as f64;
        self.waveform.sample(phase) * self.envelope.gain_at(t)
    }
}

/// Anything that can place voices on an audio clock.
pub trait AudioScheduler {
    /// Current clock time in seconds.
    fn current_time(&self) -> f64;
    fn schedule(&mut self, voice: Voice);
}

/// Schedules one voice per note. `when` defaults to the scheduler's current
/// time. Returns the number of voices scheduled.
pub fn schedule_notes(
    notes: &[NoteEvent],
    scheduler: &mut dyn AudioScheduler,
    when: Option<f64>,
    waveform: Waveform,
) -> usize {
    let when = when.unwrap_or_else(|| scheduler.current_time());
    let mut count = 0;
    for voice in notes.iter().filter_map(|n| Voice::for_note(n, when, waveform)) {
        scheduler.schedule(voice);
        count += 1;
    }
    log::debug!("scheduled {count} voices at {when:.3} s");
    count
}

/// Sums the active voices, one sample at a time, on its own sample clock.
#[derive(Debug, Clone)]
pub struct VoiceMixer {
    voices: Vec<Voice>,
    sample_rate: u32,
    position: u64,
}

impl VoiceMixer {
    /// Voices the realtime mixer can hold without reallocating.
    pub const CAPACITY: usize = 256;

    pub fn new(sample_rate: u32) -> VoiceMixer {
        VoiceMixer {
            voices: Vec::with_capacity(Self::CAPACITY),
            sample_rate,
            position: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples rendered so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn current_time(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    pub fn add(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// Whether another voice fits without growing the voice list.
    pub fn has_room(&self) -> bool {
        self.voices.len() < Self::CAPACITY
    }

    /// Voices that have not stopped yet.
    pub fn pending(&self) -> usize {
        self.voices.len()
    }

    /// Renders `out.len()` mono samples and advances the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
        let now = self.current_time();
        self.voices.retain(|v| v.stop > now);
    }

    /// Renders interleaved frames, writing the same sample to every channel.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let sample = self.next_sample();
            frame.iter_mut().for_each(|s| *s = sample);
        }
        let now = self.current_time();
        self.voices.retain(|v| v.stop > now);
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let t = self.current_time();
        self.position += 1;
        self.voices.iter().map(|v| v.sample_at(t)).sum()
    }
}

/// Renders scheduled voices into memory instead of a device.
#[derive(Debug, Clone)]
pub struct OfflineRenderer {
    mixer: VoiceMixer,
}

impl OfflineRenderer {
    pub fn new(sample_rate: u32) -> OfflineRenderer {
        OfflineRenderer {
            mixer: VoiceMixer::new(sample_rate),
        }
    }

    /// Renders the next `seconds` of audio.
    pub fn render(&mut self, seconds: f64) -> Vec<f32> {
        let len = (seconds * self.mixer.sample_rate() as f64).round() as usize;
        let mut out = vec![0.0; len];
        self.mixer.render(&mut out);
        out
    }

    pub fn pending(&self) -> usize {
        self.mixer.pending()
    }
}

impl AudioScheduler for OfflineRenderer {
    fn current_time(&self) -> f64 {
        self.mixer.current_time()
    }

    fn schedule(&mut self, voice: Voice) {
        self.mixer.add(voice);
    }
}
