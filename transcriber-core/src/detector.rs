//! # Pitch Detector
//!
//! Control-thread façade over the capture pipeline. It owns the input
//! stream and the control end of the bridge, enriches incoming frames with
//! the nearest note, and reports them together with stream errors as
//! [`DetectorEvent`]s.

use crossbeam_channel::{Receiver, Sender};

use crate::analyzer::{RENDER_QUANTUM, StreamAnalyzer};
use crate::audio::{self, CaptureStream};
use crate::bridge::{self, AnalysisMessage, ControlPort};
use crate::config::{AnalyzerConfig, AnalyzerConfigPatch};
use crate::error::DetectorError;
use crate::tuning;
use crate::{Frame, LevelFrame, PitchEvent, PitchFrame};

/// What the detector reports to its owner.
#[derive(Debug)]
pub enum DetectorEvent {
    Pitch(PitchEvent),
    Level(LevelFrame),
    Error(DetectorError),
}

impl DetectorEvent {
    /// The frame carried by this event, if any.
    pub fn frame(&self) -> Option<Frame> {
        match self {
            DetectorEvent::Pitch(event) => Some(Frame::Pitch(*event)),
            DetectorEvent::Level(level) => Some(Frame::Level(*level)),
            DetectorEvent::Error(_) => None,
        }
    }
}

/// Adds note name, octave and cents to a pitch frame. `None` when the
/// frequency is unusable.
pub fn enrich(frame: &PitchFrame) -> Option<PitchEvent> {
    let info = tuning::describe(frame.freq)?;
    Some(PitchEvent {
        t: frame.t,
        frequency: frame.freq,
        clarity: frame.clarity,
        rms_db: frame.rms_db,
        note: info.pitch_class,
        octave: info.octave,
        cents: info.cents,
    })
}

/// Converts one bridge message into the frame the recorder consumes.
pub fn to_frame(message: &AnalysisMessage) -> Frame {
    match message {
        AnalysisMessage::Pitch(frame) => match enrich(frame) {
            Some(event) => Frame::Pitch(event),
            None => Frame::Level(LevelFrame {
                t: frame.t,
                rms_db: frame.rms_db,
            }),
        },
        AnalysisMessage::Level(level) => Frame::Level(*level),
    }
}

/// Runs the analyzer over a recorded signal as if it arrived from a device,
/// in fixed render quanta, and returns the enriched frames in time order.
pub fn analyze_signal(samples: &[f32], sample_rate: u32, config: &AnalyzerConfig) -> Vec<Frame> {
    let (port, control) = bridge::channel(bridge::DEFAULT_CAPACITY);
    let mut analyzer = StreamAnalyzer::new(config.clone(), sample_rate, port);
    let mut frames = Vec::new();
    for block in samples.chunks(RENDER_QUANTUM) {
        analyzer.process(block);
        // Drain every quantum so the bounded channel never fills.
        frames.extend(control.drain().map(|m| to_frame(&m)));
    }
    log::debug!(
        "analyzed {:.2} s of audio into {} frames",
        analyzer.current_time(),
        frames.len()
    );
    frames
}

struct Running {
    capture: CaptureStream,
    control: ControlPort,
    suspended: bool,
    /// Drop count already reported.
    dropped_seen: u64,
}

enum DetectorState {
    Stopped,
    Running(Running),
    Destroyed,
}

/// Live pitch detection from the default input device.
pub struct PitchDetector {
    config: AnalyzerConfig,
    state: DetectorState,
    errors_tx: Sender<DetectorError>,
    errors_rx: Receiver<DetectorError>,
}

impl PitchDetector {
    pub fn new(mut config: AnalyzerConfig) -> PitchDetector {
        config.sanitize();
        let (errors_tx, errors_rx) = crossbeam_channel::unbounded();
        PitchDetector {
            config,
            state: DetectorState::Stopped,
            errors_tx,
            errors_rx,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, DetectorState::Running(_))
    }

    /// Opens the input device and starts analysis.
    ///
    /// A failure is returned and also queued as an [`DetectorEvent::Error`],
    /// so listeners that only poll events still see it. Starting a running
    /// detector does nothing.
    pub fn start(&mut self) -> Result<(), DetectorError> {
        match self.state {
            DetectorState::Running(_) => return Ok(()),
            DetectorState::Destroyed => return Err(DetectorError::Destroyed),
            DetectorState::Stopped => {}
        }

        let (port, control) = bridge::channel(bridge::DEFAULT_CAPACITY);
        match audio::start_capture(self.config.clone(), port, self.errors_tx.clone()) {
            Ok(capture) => {
                self.state = DetectorState::Running(Running {
                    capture,
                    control,
                    suspended: false,
                    dropped_seen: 0,
                });
                Ok(())
            }
            Err(e) => {
                log::error!("failed to start capture: {e}");
                let reported = DetectorError::Stream(e.to_string());
                let _ = self.errors_tx.send(reported);
                Err(e)
            }
        }
    }

    /// Everything that arrived since the last poll: frames in time order,
    /// then errors.
    pub fn poll_events(&mut self) -> Vec<DetectorEvent> {
        let mut events = Vec::new();
        if let DetectorState::Running(running) = &mut self.state {
            events.extend(running.control.drain().map(|message| match to_frame(&message) {
                Frame::Pitch(event) => DetectorEvent::Pitch(event),
                Frame::Level(level) => DetectorEvent::Level(level),
            }));
            let dropped = running.control.dropped();
            if dropped > running.dropped_seen {
                log::warn!("{} analysis frames dropped", dropped - running.dropped_seen);
                running.dropped_seen = dropped;
            }
        }
        events.extend(self.errors_rx.try_iter().map(DetectorEvent::Error));
        events
    }

    /// Merges `patch` into the live configuration. The audio thread picks it
    /// up at its next block.
    pub fn set_config(&mut self, patch: AnalyzerConfigPatch) {
        self.config.apply(&patch);
        if let DetectorState::Running(running) = &self.state {
            running.control.send_config(patch);
        }
    }

    /// Pauses frame delivery. Analyzer state is kept.
    pub fn suspend(&mut self) -> Result<(), DetectorError> {
        if let DetectorState::Running(running) = &mut self.state {
            if !running.suspended {
                running.capture.pause()?;
                running.suspended = true;
                log::info!("capture suspended");
            }
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), DetectorError> {
        if let DetectorState::Running(running) = &mut self.state {
            if running.suspended {
                running.capture.resume()?;
                running.suspended = false;
                log::info!("capture resumed");
            }
        }
        Ok(())
    }

    /// Seconds on the capture clock; 0 when not running.
    pub fn current_time(&self) -> f64 {
        match &self.state {
            DetectorState::Running(running) => running.capture.current_time(),
            _ => 0.0,
        }
    }

    /// Stops the stream and discards every frame still in flight. The
    /// detector cannot be started again.
    pub fn destroy(&mut self) {
        if let DetectorState::Running(running) = std::mem::replace(&mut self.state, DetectorState::Destroyed) {
            let discarded = running.control.drain().count();
            log::info!("detector destroyed; discarded {discarded} pending frames");
        }
        while self.errors_rx.try_recv().is_ok() {}
    }
}

impl Drop for PitchDetector {
    fn drop(&mut self) {
        self.destroy();
    }
}
