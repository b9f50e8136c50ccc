pub mod activity;
pub mod backend;
pub mod devices;
#[cfg(feature = "native-capture")]
pub mod native;
pub mod processing;
pub mod roster;
pub mod session;
pub mod virtual_backend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

pub use activity::AudioActivityMonitor;
pub use backend::{CaptureBackend, MediaTrack, TrackKind};
pub use devices::DeviceRegistry;
pub use processing::AppliedProcessing;
pub use roster::ParticipantRoster;
pub use session::{MediaSession, SessionConfig};

/// Settings applied to every audio acquisition. Any change invalidates the
/// current microphone capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub input_device_id: Option<String>,
    pub output_device_id: Option<String>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            input_device_id: None,
            output_device_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Acquiring,
    Active,
    Error,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeDirection {
    Input,
    Output,
}

/// Snapshot published to the view layer on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSessionState {
    pub session_id: String,
    pub channel_id: String,
    pub connection_state: ConnectionState,
    pub muted: bool,
    pub deafened: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub speaking: bool,
    pub input_volume: u8,
    pub output_volume: u8,
    pub last_error: Option<ErrorKind>,
    pub constraints: CaptureConstraints,
    /// What the live microphone track actually runs. `None` without one.
    pub applied_processing: Option<AppliedProcessing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl CaptureConstraints {
    /// True when switching from `self` to `other` changes the microphone capture.
    pub fn audio_differs(&self, other: &CaptureConstraints) -> bool {
        self.input_device_id != other.input_device_id
            || self.echo_cancellation != other.echo_cancellation
            || self.noise_suppression != other.noise_suppression
            || self.auto_gain_control != other.auto_gain_control
    }
}

/// Clamp a slider value into the 0–100 volume range.
pub fn clamp_volume(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_clamped() {
        assert_eq!(clamp_volume(-20), 0);
        assert_eq!(clamp_volume(55), 55);
        assert_eq!(clamp_volume(250), 100);
    }

    #[test]
    fn default_constraints_enable_processing() {
        let c = CaptureConstraints::default();
        assert!(c.echo_cancellation && c.noise_suppression && c.auto_gain_control);
        assert!(c.input_device_id.is_none());
    }

    #[test]
    fn output_device_does_not_touch_capture() {
        let base = CaptureConstraints::default();
        let output = CaptureConstraints {
            output_device_id: Some("speakers".into()),
            ..base.clone()
        };
        let input = CaptureConstraints {
            input_device_id: Some("headset".into()),
            ..base.clone()
        };
        assert!(!base.audio_differs(&output));
        assert!(base.audio_differs(&input));
    }
}
