use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::MediaError;
use crate::models::DeviceDescriptor;

use super::{AppliedProcessing, CaptureConstraints};

/// Mono f32 PCM, 48kHz. Native capture produces 960-sample (20ms) frames.
pub type PcmFrame = Arc<[f32]>;

/// Read side of an audio track's PCM feed. Holds the most recent frame.
/// The producer drops its sender when the track ends.
pub type AudioTap = watch::Receiver<PcmFrame>;

pub fn audio_tap_channel() -> (watch::Sender<PcmFrame>, AudioTap) {
    watch::channel(Arc::from(Vec::<f32>::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    Screen,
}

/// A live capture owned by the media session.
///
/// `stop` must be idempotent and must not block: implementations signal their
/// capture thread and return.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn label(&self) -> &str;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// False once stopped or after the source went away.
    fn is_live(&self) -> bool;
    fn stop(&self);
    /// PCM feed for analysis. `None` for video tracks.
    fn audio_tap(&self) -> Option<AudioTap>;
    /// Processing stages running on this track's PCM.
    fn applied_processing(&self) -> AppliedProcessing {
        AppliedProcessing::default()
    }
}

pub type SharedTrack = Arc<dyn MediaTrack>;

/// Platform capture facility: microphone, camera, display and device listing.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn acquire_audio(&self, constraints: &CaptureConstraints) -> Result<SharedTrack, MediaError>;
    async fn acquire_camera(&self) -> Result<SharedTrack, MediaError>;
    async fn acquire_display(&self) -> Result<SharedTrack, MediaError>;
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, MediaError>;
}

/// Shared flags for a track implementation. Tracks hand an `Arc` of this to
/// their capture thread, which polls `is_live`.
#[derive(Debug)]
pub struct TrackControl {
    enabled: AtomicBool,
    live: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
}

impl TrackControl {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Returns true only for the call that actually stopped the track.
    pub fn stop(&self) -> bool {
        self.stop_calls.fetch_add(1, Ordering::Relaxed);
        self.live.store(false, Ordering::Relaxed);
        !self.stopped.swap(true, Ordering::Relaxed)
    }

    /// The source went away without anyone calling `stop`.
    pub fn mark_ended(&self) {
        self.live.store(false, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::Relaxed)
    }
}

impl Default for TrackControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reports_first_call_only() {
        let control = TrackControl::new();
        assert!(control.is_live());
        assert!(control.stop());
        assert!(!control.stop());
        assert!(!control.is_live());
        assert!(control.is_stopped());
        assert_eq!(control.stop_calls(), 2);
    }

    #[test]
    fn ended_track_is_not_stopped() {
        let control = TrackControl::new();
        control.mark_ended();
        assert!(!control.is_live());
        assert!(!control.is_stopped());
    }

    #[test]
    fn tap_starts_with_empty_frame() {
        let (_tx, rx) = audio_tap_channel();
        assert!(rx.borrow().is_empty());
    }
}
