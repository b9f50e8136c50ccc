//! Capture-side audio processing for backends that own raw PCM.
//!
//! Stages run per 20ms frame on the capture thread: a noise gate when noise
//! suppression is requested, then automatic gain control with a hard limiter.
//! Echo cancellation needs a far-end reference signal, which local capture
//! does not have, so it is never applied here and is reported as such.

use serde::{Deserialize, Serialize};

use super::CaptureConstraints;

/// Level reported for an empty or all-zero frame.
pub const SILENCE_DBFS: f32 = -96.0;

/// Processing stages actually running on a microphone track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// RMS level of a frame in dBFS.
pub fn rms_dbfs(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return SILENCE_DBFS;
    }
    let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
    if rms <= f32::EPSILON {
        return SILENCE_DBFS;
    }
    (20.0 * rms.log10()).max(SILENCE_DBFS)
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

#[derive(Debug, Clone)]
pub struct AgcConfig {
    /// Level the gain steers speech towards.
    pub target_level_dbfs: f32,
    pub max_gain_db: f32,
    pub min_gain_db: f32,
    /// Frames quieter than this are treated as background and do not move the gain.
    pub floor_dbfs: f32,
    /// Smoothing when the gain has to come down (loud input).
    pub attack: f32,
    /// Smoothing when the gain has to go up (quiet input).
    pub release: f32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            target_level_dbfs: -18.0,
            max_gain_db: 30.0,
            min_gain_db: -12.0,
            floor_dbfs: -50.0,
            attack: 0.5,
            release: 0.05,
        }
    }
}

#[derive(Debug)]
pub struct AutomaticGainControl {
    config: AgcConfig,
    gain_db: f32,
}

impl AutomaticGainControl {
    pub fn new(config: AgcConfig) -> Self {
        Self { config, gain_db: 0.0 }
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn process(&mut self, frame: &mut [f32]) {
        let level = rms_dbfs(frame);
        if level > self.config.floor_dbfs {
            let desired = (self.config.target_level_dbfs - level)
                .clamp(self.config.min_gain_db, self.config.max_gain_db);
            let coeff = if desired < self.gain_db {
                self.config.attack
            } else {
                self.config.release
            };
            self.gain_db += (desired - self.gain_db) * coeff;
        }

        let gain = db_to_linear(self.gain_db);
        for sample in frame.iter_mut() {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}

impl Default for AutomaticGainControl {
    fn default() -> Self {
        Self::new(AgcConfig::default())
    }
}

/// RMS noise gate. Opens as soon as a frame crosses the threshold, stays open
/// for `hold_frames` afterwards, and ramps across a frame to avoid clicks.
#[derive(Debug)]
pub struct NoiseGate {
    threshold_dbfs: f32,
    hold_frames: u32,
    hold: u32,
    gain: f32,
}

impl NoiseGate {
    pub fn new(threshold_dbfs: f32, hold_frames: u32) -> Self {
        Self {
            threshold_dbfs,
            hold_frames,
            hold: 0,
            gain: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.gain > 0.0
    }

    pub fn process(&mut self, frame: &mut [f32]) {
        let target = if rms_dbfs(frame) >= self.threshold_dbfs {
            self.hold = self.hold_frames;
            1.0
        } else if self.hold > 0 {
            self.hold -= 1;
            1.0
        } else {
            0.0
        };

        let len = frame.len().max(1) as f32;
        let start = self.gain;
        for (i, sample) in frame.iter_mut().enumerate() {
            let gain = start + (target - start) * (i + 1) as f32 / len;
            *sample *= gain;
        }
        self.gain = target;
    }
}

impl Default for NoiseGate {
    fn default() -> Self {
        // 200ms hold at 20ms frames.
        Self::new(-50.0, 10)
    }
}

/// Per-track processing chain built from the capture constraints.
#[derive(Debug, Default)]
pub struct CaptureProcessor {
    gate: Option<NoiseGate>,
    agc: Option<AutomaticGainControl>,
}

impl CaptureProcessor {
    pub fn new(constraints: &CaptureConstraints) -> Self {
        Self {
            gate: constraints.noise_suppression.then(NoiseGate::default),
            agc: constraints.auto_gain_control.then(AutomaticGainControl::default),
        }
    }

    pub fn applied(&self) -> AppliedProcessing {
        AppliedProcessing {
            echo_cancellation: false,
            noise_suppression: self.gate.is_some(),
            auto_gain_control: self.agc.is_some(),
        }
    }

    pub fn process(&mut self, frame: &mut [f32]) {
        if let Some(gate) = self.gate.as_mut() {
            gate.process(frame);
        }
        if let Some(agc) = self.agc.as_mut() {
            agc.process(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: f32) -> Vec<f32> {
        (0..960)
            .map(|i| amplitude * (i as f32 * 0.05).sin())
            .collect()
    }

    #[test]
    fn silence_has_floor_level() {
        assert_eq!(rms_dbfs(&[]), SILENCE_DBFS);
        assert_eq!(rms_dbfs(&[0.0; 960]), SILENCE_DBFS);
        assert!((rms_dbfs(&[1.0; 960])).abs() < 0.01);
    }

    #[test]
    fn agc_lifts_quiet_speech_towards_target() {
        let mut agc = AutomaticGainControl::default();
        let before = rms_dbfs(&tone(0.01));
        let mut after = before;
        for _ in 0..200 {
            let mut frame = tone(0.01);
            agc.process(&mut frame);
            after = rms_dbfs(&frame);
        }
        assert!(agc.gain_db() > 20.0);
        assert!(after > before + 20.0);
        assert!(after <= -17.0);
    }

    #[test]
    fn agc_never_clips() {
        let mut agc = AutomaticGainControl::new(AgcConfig {
            min_gain_db: 0.0,
            ..Default::default()
        });
        let mut frame = vec![0.99; 960];
        agc.process(&mut frame);
        assert!(frame.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn agc_does_not_boost_background() {
        let mut agc = AutomaticGainControl::default();
        for _ in 0..50 {
            let mut frame = tone(0.0005);
            agc.process(&mut frame);
        }
        assert_eq!(agc.gain_db(), 0.0);
    }

    #[test]
    fn gate_closes_after_hold() {
        let mut gate = NoiseGate::new(-50.0, 2);
        let mut loud = tone(0.3);
        gate.process(&mut loud);
        assert!(gate.is_open());

        for _ in 0..2 {
            let mut quiet = tone(0.0005);
            gate.process(&mut quiet);
            assert!(gate.is_open());
        }
        let mut quiet = tone(0.0005);
        gate.process(&mut quiet);
        assert!(!gate.is_open());

        let mut quiet = tone(0.0005);
        gate.process(&mut quiet);
        assert!(quiet.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn processor_reports_what_it_runs() {
        let processor = CaptureProcessor::new(&CaptureConstraints {
            noise_suppression: false,
            ..Default::default()
        });
        assert_eq!(
            processor.applied(),
            AppliedProcessing {
                echo_cancellation: false,
                noise_suppression: false,
                auto_gain_control: true,
            }
        );
    }
}
