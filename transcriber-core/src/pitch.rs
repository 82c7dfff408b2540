//! # Pitch Detection Module
//!
//! YIN-family fundamental frequency estimation for a single analysis window.
//!
//! ## Features
//! - Difference function and cumulative mean normalized difference (CMNDF)
//! - Absolute threshold with local-minimum refinement, global-minimum fallback
//! - Parabolic interpolation for sub-sample lag accuracy
//! - RMS level (dBFS) and peak amplitude of the window
//!
//! The estimator owns its scratch arrays, sized once for the window length,
//! so [`PitchEstimator::estimate`] never allocates. It runs on the audio
//! thread.

/// Added to the RMS before taking the log so silence maps to a finite level.
const LEVEL_EPSILON: f32 = 1e-12;

/// Per-window estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz, `0.0` when there is no pitch.
    pub freq: f32,
    /// `1 - cmndf[tau]`, in `[0, 1]`.
    pub clarity: f32,
    /// RMS level in dBFS.
    pub rms_db: f32,
    /// Largest absolute sample value.
    pub peak: f32,
}

/// Search band and acceptance threshold for one estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub sample_rate: f32,
    pub min_freq: f32,
    pub max_freq: f32,
    pub yin_threshold: f32,
}

/// A YIN pitch estimator with pre-sized scratch buffers.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    diff: Vec<f32>,
    cmndf: Vec<f32>,
}

impl PitchEstimator {
    /// Creates an estimator for windows of `window_size` samples.
    pub fn new(window_size: usize) -> PitchEstimator {
        PitchEstimator {
            diff: vec![0.0; window_size],
            cmndf: vec![0.0; window_size],
        }
    }

    pub fn window_size(&self) -> usize {
        self.diff.len()
    }

    /// Estimates pitch, clarity and level of `frame`.
    ///
    /// `frame` must have the length the estimator was created with; a
    /// shorter frame is analyzed as-is, a longer one is truncated.
    ///
    /// A frame with no usable period, or whose frequency falls outside
    /// `[min_freq, max_freq]`, reports `freq = 0.0`. That is not an error.
    pub fn estimate(&mut self, frame: &[f32], params: &SearchParams) -> PitchEstimate {
        let n = frame.len().min(self.diff.len());
        let frame = &frame[..n];

        // --- Level ---
        let (sum_sq, peak) = frame
            .iter()
            .fold((0.0f32, 0.0f32), |(sum, peak), &s| (sum + s * s, peak.max(s.abs())));
        let rms = if n > 0 { (sum_sq / n as f32).sqrt() } else { 0.0 };
        let rms_db = 20.0 * (rms + LEVEL_EPSILON).log10();

        let mut estimate = PitchEstimate {
            freq: 0.0,
            clarity: 0.0,
            rms_db,
            peak,
        };
        if n < 4 || !(params.sample_rate > 0.0) {
            return estimate;
        }

        // --- Search range ---
        let clamp_lag = |lag: f32| (lag.max(0.0) as usize).clamp(2, n - 2);
        let tau_min = clamp_lag((params.sample_rate / params.max_freq).floor());
        let tau_max = clamp_lag((params.sample_rate / params.min_freq).floor());

        // --- Difference function ---
        self.diff[0] = 0.0;
        for tau in 1..=tau_max {
            let mut sum = 0.0;
            for i in 0..(n - tau) {
                let delta = frame[i] - frame[i + tau];
                sum += delta * delta;
            }
            self.diff[tau] = sum;
        }

        // --- Cumulative mean normalized difference ---
        self.cmndf[0] = 1.0;
        let mut running_sum = 0.0;
        for tau in 1..=tau_max {
            running_sum += self.diff[tau];
            self.cmndf[tau] = if running_sum > 0.0 {
                self.diff[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }

        let tau = self.select_tau(tau_min, tau_max, params.yin_threshold);
        if tau == 0 {
            return estimate;
        }

        let refined = self.parabolic_interpolation(tau, tau_max);
        estimate.clarity = (1.0 - self.cmndf[tau]).clamp(0.0, 1.0);

        let freq = params.sample_rate / refined;
        if freq.is_finite() && freq >= params.min_freq && freq <= params.max_freq {
            estimate.freq = freq;
        }
        estimate
    }

    /// First lag under the threshold, walked forward to its local minimum.
    /// Falls back to the global minimum over the range; `0` when the range
    /// holds no finite value.
    fn select_tau(&self, tau_min: usize, tau_max: usize, threshold: f32) -> usize {
        if tau_min > tau_max {
            return 0;
        }
        if let Some(mut tau) = (tau_min..=tau_max).find(|&t| self.cmndf[t] < threshold) {
            while tau < tau_max && self.cmndf[tau + 1] < self.cmndf[tau] {
                tau += 1;
            }
            return tau;
        }

        (tau_min..=tau_max)
            .filter(|&t| self.cmndf[t].is_finite())
            .min_by(|&a, &b| self.cmndf[a].total_cmp(&self.cmndf[b]))
            .unwrap_or(0)
    }

    /// Fractional lag from a parabola through `tau` and its neighbors.
    fn parabolic_interpolation(&self, tau: usize, tau_max: usize) -> f32 {
        if tau < 1 || tau + 1 > tau_max {
            return tau as f32;
        }
        let s0 = self.cmndf[tau - 1];
        let s1 = self.cmndf[tau];
        let s2 = self.cmndf[tau + 1];
        let denominator = s0 - 2.0 * s1 + s2;
        if denominator.abs() < f32::EPSILON {
            return tau as f32;
        }
        let shift = ((s0 - s2) / (2.0 * denominator)).clamp(-1.0, 1.0);
        tau as f32 + shift
    }
}

#[cfg(test)]
mod test_pitch {
    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;

    fn params() -> SearchParams {
        SearchParams {
            sample_rate: SAMPLE_RATE,
            min_freq: 60.0,
            max_freq: 1500.0,
            yin_threshold: 0.15,
        }
    }

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    fn cents_between(a: f32, b: f32) -> f32 {
        1200.0 * (a / b).log2()
    }

    #[test]
    fn pure_sines_within_a_few_cents() {
        let mut estimator = PitchEstimator::new(2048);
        for freq in [82.41, 110.0, 220.0, 329.63, 440.0, 880.0, 1244.5] {
            let estimate = estimator.estimate(&sine(freq, 0.5, 2048), &params());
            let error = cents_between(estimate.freq, freq);
            assert!(error.abs() < 5.0, "{freq} Hz estimated as {} Hz", estimate.freq);
            assert!(estimate.clarity > 0.9, "clarity {} at {freq} Hz", estimate.clarity);
        }
    }

    #[test]
    fn level_and_peak() {
        let mut estimator = PitchEstimator::new(2048);
        let estimate = estimator.estimate(&sine(440.0, 0.5, 2048), &params());
        // RMS of a sine is amplitude / sqrt(2): 0.354 -> -9.03 dBFS.
        assert!((estimate.rms_db + 9.03).abs() < 0.1, "rms {}", estimate.rms_db);
        assert!((estimate.peak - 0.5).abs() < 1e-3);
    }

    #[test]
    fn silence_has_no_pitch() {
        let mut estimator = PitchEstimator::new(1024);
        let estimate = estimator.estimate(&vec![0.0; 1024], &params());
        assert_eq!(estimate.freq, 0.0);
        assert!(estimate.rms_db < -200.0);
        assert_eq!(estimate.peak, 0.0);
    }

    #[test]
    fn noise_is_not_clear() {
        let mut seed: u32 = 0x1234_5678;
        let noise: Vec<f32> = (0..2048)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect();
        let mut estimator = PitchEstimator::new(2048);
        let estimate = estimator.estimate(&noise, &params());
        assert!(estimate.clarity < 0.6, "clarity {}", estimate.clarity);
    }

    #[test]
    fn out_of_band_reports_no_pitch() {
        let mut estimator = PitchEstimator::new(2048);
        let narrow = SearchParams {
            min_freq: 500.0,
            max_freq: 1500.0,
            ..params()
        };
        // 220 Hz lies below the band; whatever lag wins, it is not reported.
        let estimate = estimator.estimate(&sine(220.0, 0.5, 2048), &narrow);
        assert!(estimate.freq == 0.0 || estimate.freq >= 500.0);
    }
}
