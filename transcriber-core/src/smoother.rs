//! # Note Cleanup
//!
//! Removes segmentation artifacts from a raw note list. The passes run in a
//! fixed order:
//!
//! 1. **Drop** notes shorter than `min_note_ms`.
//! 2. **Merge** consecutive notes of the same pitch and near-identical
//!    frequency separated by at most `min_silence_ms`.
//! 3. **De-flicker** A-B-A runs where B is a short misdetection.
//! 4. **Legato-fill** sub-perceptual gaps left by hop quantization.
//!
//! The sequence is repeated until the list stops changing, so smoothing an
//! already smoothed list is a no-op. A note that legato-fill trims below
//! `min_note_ms` is therefore dropped in the next round.

use crate::config::RecorderConfig;
use crate::NoteEvent;

/// Frequencies closer than this merge.
pub const MERGE_FREQ_HZ: f32 = 0.5;
/// Floor for the flicker length; the effective limit is `max(min_note_ms, this)`.
pub const FLICKER_MS: f64 = 120.0;
/// Gaps shorter than this are closed.
pub const LEGATO_GAP_MS: f64 = 20.0;
/// How far the next note may start before the current note's end and still
/// be legato-filled.
pub const LEGATO_OVERLAP_MS: f64 = 80.0;

/// Runs every pass to a fixed point. Input order does not matter; the output
/// is sorted by start.
pub fn smooth(mut notes: Vec<NoteEvent>, config: &RecorderConfig) -> Vec<NoteEvent> {
    notes.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
    // Every pass either shrinks the list or only closes gaps, so this settles
    // within a few rounds; the bound guards against float churn.
    for _ in 0..=notes.len() {
        let before = notes.clone();
        drop_short(&mut notes, config.min_note_ms);
        merge_duplicates(&mut notes, config.min_silence_ms);
        remove_flicker(&mut notes, config.min_note_ms.max(FLICKER_MS));
        legato_fill(&mut notes);
        if notes == before {
            break;
        }
    }
    notes
}

/// Pass 1.
pub fn drop_short(notes: &mut Vec<NoteEvent>, min_note_ms: f64) {
    notes.retain(|n| n.duration_ms >= min_note_ms);
}

/// Pass 2.
pub fn merge_duplicates(notes: &mut Vec<NoteEvent>, max_gap_ms: f64) {
    let mut merged: Vec<NoteEvent> = Vec::with_capacity(notes.len());
    for note in notes.drain(..) {
        if let Some(prev) = merged.last_mut() {
            let gap = note.start_ms - prev.end_ms();
            if prev.same_note(&note)
                && (prev.frequency - note.frequency).abs() < MERGE_FREQ_HZ
                && gap <= max_gap_ms
            {
                absorb(prev, &note);
                continue;
            }
        }
        merged.push(note);
    }
    *notes = merged;
}

/// Pass 3.
pub fn remove_flicker(notes: &mut Vec<NoteEvent>, max_flicker_ms: f64) {
    let mut i = 0;
    while i + 2 < notes.len() {
        let is_flicker = notes[i].same_note(&notes[i + 2]) && notes[i + 1].duration_ms < max_flicker_ms;
        if is_flicker {
            let outer = notes.remove(i + 2);
            notes.remove(i + 1);
            absorb(&mut notes[i], &outer);
            // The widened note may start a new A-B-A run; look again.
            continue;
        }
        i += 1;
    }
}

/// Pass 4.
pub fn legato_fill(notes: &mut [NoteEvent]) {
    for i in 0..notes.len().saturating_sub(1) {
        let next_start = notes[i + 1].start_ms;
        let current = &mut notes[i];
        let gap = next_start - current.end_ms();
        if gap < LEGATO_GAP_MS && gap >= -LEGATO_OVERLAP_MS {
            current.duration_ms = (next_start - current.start_ms).max(0.0);
        }
    }
}

/// Widens `into` to cover `other` and keeps the stronger velocity and clarity.
fn absorb(into: &mut NoteEvent, other: &NoteEvent) {
    into.extend_to(other.end_ms());
    into.velocity = into.velocity.max(other.velocity);
    into.clarity = into.clarity.max(other.clarity);
}
