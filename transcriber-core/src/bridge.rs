//! # Audio/Control Bridge
//!
//! The only link between the audio thread and the control thread: two
//! bounded channels carrying plain data records. Frames flow out of the audio
//! thread, configuration patches flow in. Nothing mutable is shared.
//!
//! The audio side never blocks. A full frame channel drops the frame and
//! counts it; a late or missing frame simply does not contribute to
//! segmentation.
//!
//! Messages serialize to the tagged shapes
//! `{"type":"pitch","t":..,"freq":..,"clarity":..,"rmsDb":..}`,
//! `{"type":"level","t":..,"rmsDb":..}` and
//! `{"type":"config","value":{..}}`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryIter, TrySendError};
use serde::{Deserialize, Serialize};

use crate::config::AnalyzerConfigPatch;
use crate::{LevelFrame, PitchFrame};

/// Frames buffered between the two threads, ~6 s at the default hop.
pub const DEFAULT_CAPACITY: usize = 512;

/// Audio thread to control thread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalysisMessage {
    Pitch(PitchFrame),
    Level(LevelFrame),
}

impl AnalysisMessage {
    pub fn time(&self) -> f64 {
        match self {
            AnalysisMessage::Pitch(frame) => frame.t,
            AnalysisMessage::Level(frame) => frame.t,
        }
    }
}

/// Control thread to audio thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ControlMessage {
    Config(AnalyzerConfigPatch),
}

/// The end of the bridge owned by the audio callback.
#[derive(Debug)]
pub struct AudioPort {
    frames: Sender<AnalysisMessage>,
    control: Receiver<ControlMessage>,
    dropped: Arc<AtomicU64>,
}

/// The end of the bridge owned by the control thread.
#[derive(Debug)]
pub struct ControlPort {
    frames: Receiver<AnalysisMessage>,
    control: Sender<ControlMessage>,
    dropped: Arc<AtomicU64>,
}

/// Creates a connected pair of ports.
pub fn channel(capacity: usize) -> (AudioPort, ControlPort) {
    let (frames_tx, frames_rx) = crossbeam_channel::bounded(capacity.max(1));
    // Config updates are rare and tiny; never drop one.
    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        AudioPort {
            frames: frames_tx,
            control: control_rx,
            dropped: dropped.clone(),
        },
        ControlPort {
            frames: frames_rx,
            control: control_tx,
            dropped,
        },
    )
}

impl AudioPort {
    /// Posts a frame without blocking. Returns `false` when it was dropped.
    pub fn post(&self, message: AnalysisMessage) -> bool {
        match self.frames.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Merges every pending config patch into one, oldest first.
    pub fn take_config(&self) -> Option<AnalyzerConfigPatch> {
        let mut merged: Option<AnalyzerConfigPatch> = None;
        while let Ok(ControlMessage::Config(patch)) = self.control.try_recv() {
            merged = Some(match merged {
                None => patch,
                Some(prev) => merge_patches(prev, patch),
            });
        }
        merged
    }

    /// Frames lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ControlPort {
    pub fn send_config(&self, patch: AnalyzerConfigPatch) {
        // A closed channel means the audio side is gone; nothing to update.
        let _ = self.control.send(ControlMessage::Config(patch));
    }

    /// Frames posted so far, in the order the audio thread produced them.
    pub fn drain(&self) -> TryIter<'_, AnalysisMessage> {
        self.frames.try_iter()
    }

    /// Frames the audio side could not post, as counted there.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn merge_patches(older: AnalyzerConfigPatch, newer: AnalyzerConfigPatch) -> AnalyzerConfigPatch {
    AnalyzerConfigPatch {
        buffer_size: newer.buffer_size.or(older.buffer_size),
        hop_size: newer.hop_size.or(older.hop_size),
        min_freq: newer.min_freq.or(older.min_freq),
        max_freq: newer.max_freq.or(older.max_freq),
        yin_threshold: newer.yin_threshold.or(older.yin_threshold),
        rms_floor_db: newer.rms_floor_db.or(older.rms_floor_db),
        clarity_floor: newer.clarity_floor.or(older.clarity_floor),
        hang_ms: newer.hang_ms.or(older.hang_ms),
        dc_block: newer.dc_block.or(older.dc_block),
    }
}

#[cfg(test)]
mod test_bridge {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        let pitch = AnalysisMessage::Pitch(PitchFrame {
            t: 1.5,
            freq: 440.0,
            clarity: 0.5,
            rms_db: -20.0,
        });
        assert_eq!(
            serde_json::to_value(pitch).unwrap(),
            json!({ "type": "pitch", "t": 1.5, "freq": 440.0, "clarity": 0.5, "rmsDb": -20.0 })
        );

        let level = AnalysisMessage::Level(LevelFrame { t: 2.0, rms_db: -70.0 });
        assert_eq!(
            serde_json::to_value(level).unwrap(),
            json!({ "type": "level", "t": 2.0, "rmsDb": -70.0 })
        );

        let config: ControlMessage =
            serde_json::from_value(json!({ "type": "config", "value": { "hang_ms": 80.0 } })).unwrap();
        assert_eq!(
            config,
            ControlMessage::Config(AnalyzerConfigPatch {
                hang_ms: Some(80.0),
                ..Default::default()
            })
        );
    }

    #[test]
    fn config_patch_uses_camel_case_like_frames() {
        let patch = AnalyzerConfigPatch {
            hang_ms: Some(80.0),
            rms_floor_db: Some(-50.0),
            ..Default::default()
        };
        let wire = serde_json::to_value(ControlMessage::Config(patch.clone())).unwrap();
        assert_eq!(wire["value"]["hangMs"], json!(80.0));
        assert_eq!(wire["value"]["rmsFloorDb"], json!(-50.0));

        let parsed: ControlMessage =
            serde_json::from_value(json!({ "type": "config", "value": { "hangMs": 80.0, "rmsFloorDb": -50.0 } }))
                .unwrap();
        assert_eq!(parsed, ControlMessage::Config(patch));
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (audio, control) = channel(2);
        for i in 0..5 {
            audio.post(AnalysisMessage::Level(LevelFrame { t: i as f64, rms_db: -90.0 }));
        }
        assert_eq!(audio.dropped(), 3);
        assert_eq!(control.dropped(), 3);
        let times: Vec<f64> = control.drain().map(|m| m.time()).collect();
        assert_eq!(times, vec![0.0, 1.0]);
    }

    #[test]
    fn pending_patches_merge_newest_wins() {
        let (audio, control) = channel(4);
        control.send_config(AnalyzerConfigPatch {
            hang_ms: Some(50.0),
            hop_size: Some(256),
            ..Default::default()
        });
        control.send_config(AnalyzerConfigPatch {
            hang_ms: Some(200.0),
            ..Default::default()
        });
        let patch = audio.take_config().unwrap();
        assert_eq!(patch.hang_ms, Some(200.0));
        assert_eq!(patch.hop_size, Some(256));
        assert!(audio.take_config().is_none());
    }
}
