//! # Configuration Module
//!
//! Tunable parameters for the analysis stage (audio thread) and the
//! recording stage (control thread), plus loading them from a JSON file.
//!
//! The thresholds below are empirically tuned for a voice or a single
//! melodic instrument into a laptop microphone. They have no formal
//! derivation; a different instrument or input chain may need retuning.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::ConfigError;
use crate::tuning::PitchClass;

/// Smallest analysis window accepted when merging configuration.
pub const MIN_BUFFER_SIZE: usize = 64;

/// Parameters of the audio-thread analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Analysis window length in samples.
    pub buffer_size: usize,
    /// Samples consumed between two analysis windows.
    pub hop_size: usize,
    /// Lowest frequency the estimator searches for, in Hz.
    pub min_freq: f32,
    /// Highest frequency the estimator searches for, in Hz.
    pub max_freq: f32,
    /// CMNDF value under which a lag is accepted as the period.
    pub yin_threshold: f32,
    /// Frames at or below this level (dBFS) are never voiced.
    pub rms_floor_db: f32,
    /// Minimum clarity for a frame to count as voiced.
    pub clarity_floor: f32,
    /// Grace period that keeps a just-voiced signal reported as pitched.
    pub hang_ms: f32,
    /// Run the one-pole DC blocker on incoming samples.
    pub dc_block: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            hop_size: 512,
            min_freq: 60.0,
            max_freq: 1500.0,
            yin_threshold: 0.15,
            rms_floor_db: -55.0,
            clarity_floor: 0.6,
            hang_ms: 120.0,
            dc_block: true,
        }
    }
}

/// A partial update for [`AnalyzerConfig`], sent live to the audio thread.
///
/// Field names are camelCase on the wire like the analysis frames; the
/// snake_case spellings of the config file are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyzerConfigPatch {
    #[serde(alias = "buffer_size")]
    pub buffer_size: Option<usize>,
    #[serde(alias = "hop_size")]
    pub hop_size: Option<usize>,
    #[serde(alias = "min_freq")]
    pub min_freq: Option<f32>,
    #[serde(alias = "max_freq")]
    pub max_freq: Option<f32>,
    #[serde(alias = "yin_threshold")]
    pub yin_threshold: Option<f32>,
    #[serde(alias = "rms_floor_db")]
    pub rms_floor_db: Option<f32>,
    #[serde(alias = "clarity_floor")]
    pub clarity_floor: Option<f32>,
    #[serde(alias = "hang_ms")]
    pub hang_ms: Option<f32>,
    #[serde(alias = "dc_block")]
    pub dc_block: Option<bool>,
}

impl AnalyzerConfig {
    /// Merges the fields present in `patch` and repairs invalid combinations.
    pub fn apply(&mut self, patch: &AnalyzerConfigPatch) {
        if let Some(v) = patch.buffer_size {
            self.buffer_size = v;
        }
        if let Some(v) = patch.hop_size {
            self.hop_size = v;
        }
        if let Some(v) = patch.min_freq {
            self.min_freq = v;
        }
        if let Some(v) = patch.max_freq {
            self.max_freq = v;
        }
        if let Some(v) = patch.yin_threshold {
            self.yin_threshold = v;
        }
        if let Some(v) = patch.rms_floor_db {
            self.rms_floor_db = v;
        }
        if let Some(v) = patch.clarity_floor {
            self.clarity_floor = v;
        }
        if let Some(v) = patch.hang_ms {
            self.hang_ms = v;
        }
        if let Some(v) = patch.dc_block {
            self.dc_block = v;
        }
        self.sanitize();
    }

    /// Clamps values into a range the analyzer can run with.
    pub fn sanitize(&mut self) {
        self.buffer_size = self.buffer_size.max(MIN_BUFFER_SIZE);
        self.hop_size = self.hop_size.clamp(1, self.buffer_size);
        if !(self.min_freq > 0.0) {
            self.min_freq = 1.0;
        }
        if self.max_freq < self.min_freq {
            std::mem::swap(&mut self.min_freq, &mut self.max_freq);
        }
        self.clarity_floor = self.clarity_floor.clamp(0.0, 1.0);
        self.hang_ms = self.hang_ms.max(0.0);
    }

    /// Ring buffer capacity that tolerates the hop cadence lagging the
    /// audio callback by one full window.
    pub fn ring_capacity(&self) -> usize {
        self.buffer_size * 2
    }
}

/// Thresholds for segmentation, cleanup and quantization of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Window, in cents, inside which two pitches are the same note.
    pub cents_tolerance: f32,
    /// Shortest legitimate note.
    pub min_note_ms: f64,
    /// Stability required before a pitch change is accepted.
    pub min_change_ms: f64,
    /// Gap required to split a repeated pitch into two notes.
    pub min_silence_ms: f64,
    /// Frames quieter than this are treated as silence.
    pub silence_db: f32,
    /// Relative RMS power jump that marks a new articulation.
    pub attack_ratio: f32,
    /// Input-path latency subtracted from every frame time.
    pub latency_ms: f64,
    /// Beats per minute, 40..=240.
    pub tempo: f64,
    /// Grid subdivisions per beat.
    pub grid: u32,
    /// Swing amount, 0..=0.6.
    pub swing: f64,
    /// Pitch classes to snap detected pitches to.
    pub scale: Option<Vec<PitchClass>>,
}

pub const MIN_TEMPO: f64 = 40.0;
pub const MAX_TEMPO: f64 = 240.0;
pub const MAX_SWING: f64 = 0.6;
pub const MAX_GRID: u32 = 32;

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            cents_tolerance: 50.0,
            min_note_ms: 90.0,
            min_change_ms: 60.0,
            min_silence_ms: 60.0,
            silence_db: -50.0,
            attack_ratio: 1.8,
            latency_ms: 0.0,
            tempo: 120.0,
            grid: 4,
            swing: 0.0,
            scale: None,
        }
    }
}

impl RecorderConfig {
    /// Semitone distance under which two pitches are the same note.
    pub fn tolerance_semitones(&self) -> f32 {
        self.cents_tolerance / 100.0
    }

    /// The attack ratio expressed as a level step in dB.
    pub fn attack_step_db(&self) -> f32 {
        10.0 * self.attack_ratio.max(1.0).log10()
    }

    /// Clamps the rhythmic settings into their supported ranges.
    pub fn sanitize(&mut self) {
        self.tempo = clamp_tempo(self.tempo);
        self.grid = clamp_grid(self.grid);
        self.swing = clamp_swing(self.swing);
    }
}

pub fn clamp_tempo(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return RecorderConfig::default().tempo;
    }
    bpm.clamp(MIN_TEMPO, MAX_TEMPO)
}

pub fn clamp_grid(ticks_per_beat: u32) -> u32 {
    ticks_per_beat.clamp(1, MAX_GRID)
}

pub fn clamp_swing(amount: f64) -> f64 {
    if amount.is_nan() {
        return 0.0;
    }
    amount.clamp(0.0, MAX_SWING)
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    pub analyzer: AnalyzerConfig,
    pub recorder: RecorderConfig,
}

/// Loads a configuration file. Missing fields take their defaults.
///
/// # Arguments
/// * `path` - Path to a JSON file
///
/// # Returns
/// * `Ok(config)` - Parsed and sanitized configuration
/// * `Err(e)` - File could not be read or parsed
pub fn load_config(path: &Path) -> Result<TranscriberConfig, ConfigError> {
    let mut file = File::open(path)?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    let mut config: TranscriberConfig = serde_json::from_str(&data)?;
    config.analyzer.sanitize();
    config.recorder.sanitize();
    Ok(config)
}
