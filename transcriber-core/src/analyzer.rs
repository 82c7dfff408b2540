//! # Stream Analyzer
//!
//! The audio-thread half of the pipeline. Called synchronously from the
//! capture callback with each block of samples, it fills the ring buffer and
//! runs one pitch estimate per hop, posting the gate's verdict across the
//! bridge.
//!
//! Nothing here blocks or allocates per block. Scratch space is sized from
//! the configuration and only re-sized when a config patch changes the
//! window length.

use crate::bridge::{AnalysisMessage, AudioPort};
use crate::config::AnalyzerConfig;
use crate::pitch::{PitchEstimator, SearchParams};
use crate::ring_buffer::{DcBlocker, RingBuffer};
use crate::voicing::{GateOutput, GateParams, VoicingGate};
use crate::{LevelFrame, PitchFrame};

/// Block size the offline paths feed the analyzer with.
pub const RENDER_QUANTUM: usize = 128;

pub struct StreamAnalyzer {
    config: AnalyzerConfig,
    sample_rate: u32,
    ring: RingBuffer,
    window: Vec<f32>,
    estimator: PitchEstimator,
    gate: VoicingGate,
    dc_blocker: DcBlocker,
    port: AudioPort,
    /// Samples received since the stream started; the analysis clock.
    samples_seen: u64,
}

impl StreamAnalyzer {
    pub fn new(mut config: AnalyzerConfig, sample_rate: u32, port: AudioPort) -> StreamAnalyzer {
        config.sanitize();
        StreamAnalyzer {
            ring: RingBuffer::new(config.ring_capacity()),
            window: vec![0.0; config.buffer_size],
            estimator: PitchEstimator::new(config.buffer_size),
            gate: VoicingGate::new(),
            dc_blocker: DcBlocker::new(),
            sample_rate,
            port,
            samples_seen: 0,
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Seconds of audio received so far.
    pub fn current_time(&self) -> f64 {
        self.samples_seen as f64 / self.sample_rate as f64
    }

    /// Frames the bridge had to drop.
    pub fn dropped(&self) -> u64 {
        self.port.dropped()
    }

    /// Processes one block of mono samples.
    pub fn process(&mut self, block: &[f32]) {
        self.apply_pending_config();
        for &sample in block {
            self.push_sample(sample);
        }
    }

    /// Processes one block of interleaved samples, averaging channels.
    pub fn process_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.process(data);
            return;
        }
        self.apply_pending_config();
        for frame in data.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            self.push_sample(mono);
        }
    }

    /// Config patches take effect at block boundaries only.
    fn apply_pending_config(&mut self) {
        if let Some(patch) = self.port.take_config() {
            let window_changed = patch.buffer_size.is_some_and(|n| n != self.config.buffer_size);
            self.config.apply(&patch);
            if window_changed {
                self.resize();
            }
        }
    }

    #[inline]
    fn push_sample(&mut self, sample: f32) {
        let sample = if self.config.dc_block {
            self.dc_blocker.process(sample)
        } else {
            sample
        };
        self.ring.push(sample);
        self.samples_seen += 1;

        if self.ring.available() >= self.config.buffer_size {
            self.analyze_hop();
        }
    }

    fn analyze_hop(&mut self) {
        self.ring.read_window(&mut self.window, self.config.hop_size);

        let params = SearchParams {
            sample_rate: self.sample_rate as f32,
            min_freq: self.config.min_freq,
            max_freq: self.config.max_freq,
            yin_threshold: self.config.yin_threshold,
        };
        let estimate = self.estimator.estimate(&self.window, &params);

        let gate_params = GateParams {
            rms_floor_db: self.config.rms_floor_db,
            clarity_floor: self.config.clarity_floor,
            hang_ms: self.config.hang_ms,
        };
        let t = self.current_time();
        let message = match self.gate.process(t, &estimate, &gate_params) {
            GateOutput::Pitch { freq, clarity, rms_db } => AnalysisMessage::Pitch(PitchFrame {
                t,
                freq,
                clarity,
                rms_db,
            }),
            GateOutput::Level { rms_db } => AnalysisMessage::Level(LevelFrame { t, rms_db }),
        };
        self.port.post(message);
    }

    /// Re-sizes scratch space for a new window length. Only happens on a
    /// config change, never per block.
    fn resize(&mut self) {
        self.ring = RingBuffer::new(self.config.ring_capacity());
        self.window = vec![0.0; self.config.buffer_size];
        self.estimator = PitchEstimator::new(self.config.buffer_size);
        self.gate.reset();
    }
}
