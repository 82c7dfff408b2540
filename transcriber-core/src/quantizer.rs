//! # Quantizer
//!
//! Snaps note boundaries onto a tempo grid, with optional swing, then repairs
//! overlaps so the result never has two notes sounding at once.

use crate::NoteEvent;

/// Tolerance for deciding that a grid tick sits on an eighth-note boundary.
const GRID_EPSILON: f64 = 1e-6;

/// Tempo grid with swing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    /// Beats per minute.
    pub tempo: f64,
    /// Ticks per beat.
    pub grid: u32,
    /// 0 to 0.6.
    pub swing: f64,
}

impl Grid {
    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.tempo
    }

    /// Length of one grid tick in milliseconds.
    pub fn tick_ms(&self) -> f64 {
        self.beat_ms() / self.grid.max(1) as f64
    }

    pub fn eighth_ms(&self) -> f64 {
        self.beat_ms() / 2.0
    }

    /// Nearest tick to `ms`, pushed late by `swing * eighth / 3` when the
    /// tick falls on an off-beat eighth.
    pub fn snap(&self, ms: f64) -> f64 {
        let tick = self.tick_ms();
        let snapped = (ms / tick).round() * tick;
        if self.swing <= 0.0 {
            return snapped;
        }

        let eighths = snapped / self.eighth_ms();
        let on_eighth = (eighths - eighths.round()).abs() < GRID_EPSILON;
        let off_beat = (eighths.round() as i64).rem_euclid(2) == 1;
        if on_eighth && off_beat {
            snapped + self.swing * (self.eighth_ms() / 3.0)
        } else {
            snapped
        }
    }
}

/// Quantizes every note and removes overlaps.
///
/// Each note's start and end snap independently; the duration is at least
/// one tick. After sorting by start, a note is cut short where the next one
/// begins, so for adjacent notes `a.start_ms + a.duration_ms <= b.start_ms`.
pub fn quantize(notes: &[NoteEvent], grid: &Grid) -> Vec<NoteEvent> {
    let tick = grid.tick_ms();
    let mut quantized: Vec<NoteEvent> = notes
        .iter()
        .map(|note| {
            let start = grid.snap(note.start_ms);
            let end = grid.snap(note.end_ms());
            NoteEvent {
                start_ms: start,
                duration_ms: tick.max(end - start),
                ..note.clone()
            }
        })
        .collect();

    quantized.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
    for i in 0..quantized.len().saturating_sub(1) {
        let next_start = quantized[i + 1].start_ms;
        let note = &mut quantized[i];
        note.duration_ms = fit_before(note.start_ms, note.duration_ms, next_start);
    }
    quantized
}

/// Largest duration up to `duration` with `start + duration <= next_start`
/// as evaluated in f64. `next_start - start` alone can round one ulp past
/// the boundary once added back.
fn fit_before(start: f64, duration: f64, next_start: f64) -> f64 {
    let mut fitted = duration.min(next_start - start).max(0.0);
    while fitted > 0.0 && start + fitted > next_start {
        // Next representable value toward zero.
        fitted = f64::from_bits(fitted.to_bits() - 1);
    }
    fitted
}
