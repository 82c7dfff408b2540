//! Fixed-capacity sample store filled by the audio callback.
//!
//! Decouples the callback's render quantum from the analysis window and hop
//! size: the callback pushes every sample, the analyzer reads the most recent
//! window whenever enough samples are available and then consumes one hop.

/// Pole of the DC blocker, ~35 Hz corner at 44.1 kHz.
pub const DC_BLOCK_R: f32 = 0.995;

/// Circular buffer of mono samples.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f32>,
    write_pos: usize,
    have: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> RingBuffer {
        RingBuffer {
            data: vec![0.0; capacity.max(1)],
            write_pos: 0,
            have: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Samples written and not yet consumed, capped at capacity.
    pub fn available(&self) -> usize {
        self.have
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.data[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.data.len();
        self.have = (self.have + 1).min(self.data.len());
    }

    /// Copies the most recent `dst.len()` samples into `dst`, oldest first,
    /// then consumes `hop_size` samples. Consecutive windows overlap by
    /// `dst.len() - hop_size`.
    ///
    /// The caller gates on [`available`](Self::available); a window longer
    /// than the capacity is left untouched.
    pub fn read_window(&mut self, dst: &mut [f32], hop_size: usize) {
        let n = dst.len();
        let len = self.data.len();
        if n == 0 || n > len {
            return;
        }

        let mut idx = (self.write_pos + len - n) % len;
        for d in dst.iter_mut() {
            *d = self.data[idx];
            idx += 1;
            if idx == len {
                idx = 0;
            }
        }
        self.have = self.have.saturating_sub(hop_size);
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.have = 0;
    }
}

/// One-pole high-pass filter: `y[n] = x[n] - x[n-1] + R * y[n-1]`.
///
/// Must see every sample in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcBlocker {
    prev_input: f32,
    prev_output: f32,
}

impl DcBlocker {
    pub fn new() -> DcBlocker {
        DcBlocker::default()
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = input - self.prev_input + DC_BLOCK_R * self.prev_output;
        self.prev_input = input;
        self.prev_output = output;
        output
    }

    pub fn reset(&mut self) {
        *self = DcBlocker::default();
    }
}
