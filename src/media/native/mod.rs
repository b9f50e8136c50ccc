pub mod audio;
pub mod screen;
pub mod video;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::MediaError;
use crate::models::DeviceDescriptor;

use super::backend::{AudioTap, CaptureBackend, MediaTrack, SharedTrack, TrackControl, TrackKind};
use super::{AppliedProcessing, CaptureConstraints};

/// Track backed by a dedicated capture thread. The thread owns the platform
/// handle (cpal stream, nokhwa camera, ffmpeg child) and exits once the
/// shared control reports the track is no longer live.
#[derive(Debug)]
pub struct NativeTrack {
    id: String,
    kind: TrackKind,
    label: String,
    control: Arc<TrackControl>,
    tap: Option<AudioTap>,
    processing: AppliedProcessing,
}

impl NativeTrack {
    fn new(kind: TrackKind, label: String, control: Arc<TrackControl>, tap: Option<AudioTap>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label,
            control,
            tap,
            processing: AppliedProcessing::default(),
        }
    }

    fn with_processing(mut self, processing: AppliedProcessing) -> Self {
        self.processing = processing;
        self
    }
}

impl MediaTrack for NativeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn set_enabled(&self, enabled: bool) {
        self.control.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    fn is_live(&self) -> bool {
        self.control.is_live()
    }

    fn stop(&self) {
        if self.control.stop() {
            info!("Stopping {:?} capture: {}", self.kind, self.label);
        }
    }

    fn audio_tap(&self) -> Option<AudioTap> {
        self.tap.clone()
    }

    fn applied_processing(&self) -> AppliedProcessing {
        self.processing
    }
}

impl Drop for NativeTrack {
    fn drop(&mut self) {
        self.control.stop();
    }
}

/// Real hardware: cpal for audio, nokhwa for the camera, ffmpeg for the screen.
/// Device ids are platform device names.
#[derive(Debug, Default, Clone)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

fn join_error(e: tokio::task::JoinError) -> MediaError {
    MediaError::AcquisitionFailed(format!("Capture thread panicked: {}", e))
}

#[async_trait]
impl CaptureBackend for NativeBackend {
    async fn acquire_audio(&self, constraints: &CaptureConstraints) -> Result<SharedTrack, MediaError> {
        let constraints = constraints.clone();
        let track = tokio::task::spawn_blocking(move || audio::start_capture(&constraints))
            .await
            .map_err(join_error)??;
        Ok(Arc::new(track))
    }

    async fn acquire_camera(&self) -> Result<SharedTrack, MediaError> {
        let track = tokio::task::spawn_blocking(|| video::start_camera(None))
            .await
            .map_err(join_error)??;
        Ok(Arc::new(track))
    }

    async fn acquire_display(&self) -> Result<SharedTrack, MediaError> {
        let track = tokio::task::spawn_blocking(screen::start_screen_capture)
            .await
            .map_err(join_error)??;
        Ok(Arc::new(track))
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, MediaError> {
        tokio::task::spawn_blocking(audio::list_devices)
            .await
            .map_err(|e| MediaError::EnumerationFailed(e.to_string()))?
    }
}
