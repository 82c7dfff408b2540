//! Voicing gate with hang time.
//!
//! A frame is voiced when it is loud enough, clear enough and has a pitch.
//! After a voiced frame the gate keeps reporting pitch for `hang_ms`, so a
//! short dropout inside a sustained note does not break it. During that
//! grace period the last voiced pitch is held.

use crate::pitch::PitchEstimate;

/// Output of the gate for one analysis hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateOutput {
    /// Voiced, or inside the hang time of a voiced frame.
    Pitch { freq: f32, clarity: f32, rms_db: f32 },
    /// Unvoiced; only the level is reported.
    Level { rms_db: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateParams {
    pub rms_floor_db: f32,
    pub clarity_floor: f32,
    pub hang_ms: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VoicingGate {
    last_voiced_until: Option<f64>,
    held_freq: f32,
    held_clarity: f32,
}

impl VoicingGate {
    pub fn new() -> VoicingGate {
        VoicingGate::default()
    }

    /// Classifies the estimate for the hop at time `t` (seconds).
    pub fn process(&mut self, t: f64, estimate: &PitchEstimate, params: &GateParams) -> GateOutput {
        let voiced_now = estimate.rms_db > params.rms_floor_db
            && estimate.clarity >= params.clarity_floor
            && estimate.freq > 0.0;

        if voiced_now {
            self.last_voiced_until = Some(t + params.hang_ms as f64 / 1000.0);
            self.held_freq = estimate.freq;
            self.held_clarity = estimate.clarity;
            return GateOutput::Pitch {
                freq: estimate.freq,
                clarity: estimate.clarity,
                rms_db: estimate.rms_db,
            };
        }

        match self.last_voiced_until {
            Some(until) if t < until => GateOutput::Pitch {
                freq: self.held_freq,
                clarity: self.held_clarity,
                rms_db: estimate.rms_db,
            },
            _ => GateOutput::Level {
                rms_db: estimate.rms_db,
            },
        }
    }

    pub fn reset(&mut self) {
        *self = VoicingGate::default();
    }
}

#[cfg(test)]
mod test_voicing {
    use super::*;

    const PARAMS: GateParams = GateParams {
        rms_floor_db: -55.0,
        clarity_floor: 0.6,
        hang_ms: 120.0,
    };

    fn voiced() -> PitchEstimate {
        PitchEstimate {
            freq: 440.0,
            clarity: 0.95,
            rms_db: -20.0,
            peak: 0.1,
        }
    }

    fn quiet() -> PitchEstimate {
        PitchEstimate {
            freq: 0.0,
            clarity: 0.1,
            rms_db: -80.0,
            peak: 0.0,
        }
    }

    #[test]
    fn silence_never_reports_pitch() {
        let mut gate = VoicingGate::new();
        for i in 0..10 {
            let out = gate.process(i as f64 * 0.01, &quiet(), &PARAMS);
            assert!(matches!(out, GateOutput::Level { .. }));
        }
    }

    #[test]
    fn hang_time_bridges_short_dropout() {
        let mut gate = VoicingGate::new();
        assert!(matches!(gate.process(0.0, &voiced(), &PARAMS), GateOutput::Pitch { .. }));

        match gate.process(0.05, &quiet(), &PARAMS) {
            GateOutput::Pitch { freq, rms_db, .. } => {
                assert_eq!(freq, 440.0);
                assert_eq!(rms_db, -80.0);
            }
            other => panic!("expected held pitch, got {other:?}"),
        }
    }

    #[test]
    fn gap_longer_than_hang_is_level() {
        let mut gate = VoicingGate::new();
        gate.process(0.0, &voiced(), &PARAMS);
        assert!(matches!(gate.process(0.2, &quiet(), &PARAMS), GateOutput::Level { .. }));
    }

    #[test]
    fn low_clarity_is_unvoiced() {
        let mut gate = VoicingGate::new();
        let murky = PitchEstimate {
            clarity: 0.3,
            ..voiced()
        };
        assert!(matches!(gate.process(0.0, &murky, &PARAMS), GateOutput::Level { .. }));
    }
}
