use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::error::MediaError;
use crate::models::{DeviceDescriptor, DeviceKind};

use super::backend::{
    audio_tap_channel, AudioTap, CaptureBackend, MediaTrack, PcmFrame, SharedTrack, TrackControl,
    TrackKind,
};
use super::CaptureConstraints;

/// In-memory track. Audio tracks carry a PCM feed driven by [`VirtualTrack::feed`].
#[derive(Debug)]
pub struct VirtualTrack {
    id: String,
    kind: TrackKind,
    label: String,
    control: TrackControl,
    frames: Mutex<Option<watch::Sender<PcmFrame>>>,
    tap: Option<AudioTap>,
}

impl VirtualTrack {
    fn new(kind: TrackKind, label: &str) -> Arc<Self> {
        let (frames, tap) = if kind == TrackKind::Audio {
            let (tx, rx) = audio_tap_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.to_string(),
            control: TrackControl::new(),
            frames: Mutex::new(frames),
            tap,
        })
    }

    pub fn audio(label: &str) -> Arc<Self> {
        Self::new(TrackKind::Audio, label)
    }

    pub fn video(label: &str) -> Arc<Self> {
        Self::new(TrackKind::Video, label)
    }

    pub fn screen(label: &str) -> Arc<Self> {
        Self::new(TrackKind::Screen, label)
    }

    /// Publish a PCM frame as the track's current audio.
    pub fn feed(&self, samples: &[f32]) {
        if let Some(tx) = self.frames.lock().as_ref() {
            tx.send_replace(Arc::from(samples));
        }
    }

    /// Simulate the device disappearing (unplugged, revoked).
    pub fn end(&self) {
        self.control.mark_ended();
        self.frames.lock().take();
    }

    pub fn stop_calls(&self) -> usize {
        self.control.stop_calls()
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }
}

impl MediaTrack for VirtualTrack {
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
            self.frames.lock().take();
            debug!("Virtual {:?} track {} stopped", self.kind, self.id);
        }
    }

    fn audio_tap(&self) -> Option<AudioTap> {
        self.tap.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    Microphone,
    Camera,
    Display,
}

/// Holds one acquisition open until released (or dropped).
pub struct AcquisitionGate {
    tx: Option<oneshot::Sender<()>>,
}

impl AcquisitionGate {
    pub fn release(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct VirtualInner {
    devices: Vec<DeviceDescriptor>,
    permission_granted: bool,
    failures: HashMap<CaptureSource, VecDeque<MediaError>>,
    gates: HashMap<CaptureSource, VecDeque<oneshot::Receiver<()>>>,
    ended_on_arrival: HashMap<CaptureSource, usize>,
    enumeration_failures: usize,
    acquisitions: HashMap<CaptureSource, usize>,
    tracks: Vec<Arc<VirtualTrack>>,
    keep_history: bool,
}

/// Capture backend with no hardware behind it. Used for headless runs and as
/// the test double: failures can be scripted and acquisitions held open.
/// Live tracks are kept for inspection; ended ones are pruned on the next
/// acquisition unless [`VirtualBackend::keep_history`] was called.
///
/// Like a browser, device labels stay empty until a microphone acquisition has
/// succeeded once.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    inner: Arc<Mutex<VirtualInner>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_devices() -> Self {
        let backend = Self::new();
        backend.add_device("virtual-mic-0", DeviceKind::Input, "Built-in Microphone");
        backend.add_device("virtual-mic-1", DeviceKind::Input, "USB Headset Microphone");
        backend.add_device("virtual-out-0", DeviceKind::Output, "Built-in Speakers");
        backend.add_device("virtual-out-1", DeviceKind::Output, "USB Headset");
        backend
    }

    /// Keep every track ever handed out, including stopped ones.
    pub fn keep_history(self) -> Self {
        self.inner.lock().keep_history = true;
        self
    }

    pub fn add_device(&self, id: &str, kind: DeviceKind, label: &str) {
        self.inner.lock().devices.push(DeviceDescriptor {
            id: id.to_string(),
            kind,
            label: label.to_string(),
        });
    }

    pub fn remove_device(&self, id: &str) {
        self.inner.lock().devices.retain(|d| d.id != id);
    }

    pub fn grant_permission(&self) {
        self.inner.lock().permission_granted = true;
    }

    pub fn has_permission(&self) -> bool {
        self.inner.lock().permission_granted
    }

    /// The next acquisition from `source` fails with `error`.
    pub fn fail_next(&self, source: CaptureSource, error: MediaError) {
        self.inner.lock().failures.entry(source).or_default().push_back(error);
    }

    /// The next acquisition from `source` stays pending until the gate is released.
    pub fn hold_next(&self, source: CaptureSource) -> AcquisitionGate {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().gates.entry(source).or_default().push_back(rx);
        AcquisitionGate { tx: Some(tx) }
    }

    /// The next track from `source` is handed out already ended.
    pub fn end_next(&self, source: CaptureSource) {
        *self.inner.lock().ended_on_arrival.entry(source).or_default() += 1;
    }

    pub fn fail_next_enumeration(&self) {
        self.inner.lock().enumeration_failures += 1;
    }

    pub fn acquisitions(&self, source: CaptureSource) -> usize {
        self.inner.lock().acquisitions.get(&source).copied().unwrap_or(0)
    }

    /// Tracks handed out so far, oldest first.
    pub fn tracks(&self) -> Vec<Arc<VirtualTrack>> {
        self.inner.lock().tracks.clone()
    }

    pub fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<VirtualTrack>> {
        self.inner.lock().tracks.iter().filter(|t| t.kind == kind).cloned().collect()
    }

    pub fn latest(&self, kind: TrackKind) -> Option<Arc<VirtualTrack>> {
        self.tracks_of(kind).pop()
    }

    pub fn live_tracks(&self, kind: TrackKind) -> usize {
        self.tracks_of(kind).iter().filter(|t| t.is_live()).count()
    }

    async fn acquire(
        &self,
        source: CaptureSource,
        kind: TrackKind,
        requested_input: Option<&str>,
    ) -> Result<SharedTrack, MediaError> {
        let (gate, failure) = {
            let mut inner = self.inner.lock();
            *inner.acquisitions.entry(source).or_default() += 1;
            let gate = inner.gates.get_mut(&source).and_then(|q| q.pop_front());
            let failure = inner.failures.get_mut(&source).and_then(|q| q.pop_front());
            (gate, failure)
        };

        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let mut inner = self.inner.lock();
        let label = match (source, requested_input) {
            (CaptureSource::Microphone, Some(id)) => inner
                .devices
                .iter()
                .find(|d| d.kind == DeviceKind::Input && d.id == id)
                .map(|d| d.label.clone())
                .ok_or_else(|| MediaError::DeviceNotFound(id.to_string()))?,
            (CaptureSource::Microphone, None) => inner
                .devices
                .iter()
                .find(|d| d.kind == DeviceKind::Input)
                .map(|d| d.label.clone())
                .unwrap_or_else(|| "Default microphone".to_string()),
            (CaptureSource::Camera, _) => "Virtual camera".to_string(),
            (CaptureSource::Display, _) => "Entire screen".to_string(),
        };

        if source == CaptureSource::Microphone {
            inner.permission_granted = true;
        }
        if !inner.keep_history {
            inner.tracks.retain(|t| t.is_live());
        }
        let track = VirtualTrack::new(kind, &label);
        if let Some(pending) = inner.ended_on_arrival.get_mut(&source).filter(|n| **n > 0) {
            *pending -= 1;
            track.end();
        }
        inner.tracks.push(track.clone());
        debug!("Virtual {:?} track {} acquired ({})", kind, track.id, label);
        Ok(track)
    }
}

#[async_trait]
impl CaptureBackend for VirtualBackend {
    async fn acquire_audio(&self, constraints: &CaptureConstraints) -> Result<SharedTrack, MediaError> {
        self.acquire(
            CaptureSource::Microphone,
            TrackKind::Audio,
            constraints.input_device_id.as_deref(),
        )
        .await
    }

    async fn acquire_camera(&self) -> Result<SharedTrack, MediaError> {
        self.acquire(CaptureSource::Camera, TrackKind::Video, None).await
    }

    async fn acquire_display(&self) -> Result<SharedTrack, MediaError> {
        self.acquire(CaptureSource::Display, TrackKind::Screen, None).await
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, MediaError> {
        let mut inner = self.inner.lock();
        if inner.enumeration_failures > 0 {
            inner.enumeration_failures -= 1;
            return Err(MediaError::EnumerationFailed("virtual device listing failed".into()));
        }
        let reveal = inner.permission_granted;
        Ok(inner
            .devices
            .iter()
            .map(|d| DeviceDescriptor {
                label: if reveal { d.label.clone() } else { String::new() },
                ..d.clone()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn labels_hidden_until_microphone_granted() {
        let backend = VirtualBackend::with_default_devices();
        let devices = backend.enumerate_devices().await.unwrap();
        assert_eq!(devices.len(), 4);
        assert!(devices.iter().all(|d| d.label.is_empty()));

        backend.acquire_audio(&CaptureConstraints::default()).await.unwrap();
        let devices = backend.enumerate_devices().await.unwrap();
        assert!(devices.iter().all(|d| !d.label.is_empty()));
    }

    #[tokio::test]
    async fn unknown_input_device_is_rejected() {
        let backend = VirtualBackend::with_default_devices();
        let constraints = CaptureConstraints {
            input_device_id: Some("missing".into()),
            ..Default::default()
        };
        let err = backend.acquire_audio(&constraints).await.unwrap_err();
        assert!(matches!(err, MediaError::DeviceNotFound(id) if id == "missing"));
        assert!(backend.tracks().is_empty());
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let backend = VirtualBackend::new();
        backend.fail_next(CaptureSource::Camera, MediaError::PermissionDenied("camera".into()));
        assert!(backend.acquire_camera().await.is_err());
        assert!(backend.acquire_camera().await.is_ok());
        assert_eq!(backend.acquisitions(CaptureSource::Camera), 2);
    }

    #[tokio::test]
    async fn held_acquisition_waits_for_release() {
        let backend = VirtualBackend::new();
        let gate = backend.hold_next(CaptureSource::Display);
        let pending = tokio::spawn({
            let backend = backend.clone();
            async move { backend.acquire_display().await }
        });
        tokio::task::yield_now().await;
        assert!(backend.tracks().is_empty());

        gate.release();
        let track = pending.await.unwrap().unwrap();
        assert_eq!(track.kind(), TrackKind::Screen);
        assert_eq!(backend.live_tracks(TrackKind::Screen), 1);
    }

    #[tokio::test]
    async fn stopped_tracks_are_pruned_without_history() {
        let backend = VirtualBackend::new();
        for _ in 0..5 {
            backend.acquire_camera().await.unwrap().stop();
        }
        let live = backend.acquire_camera().await.unwrap();
        let tracks = backend.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id(), live.id());

        let recording = VirtualBackend::new().keep_history();
        for _ in 0..3 {
            recording.acquire_camera().await.unwrap().stop();
        }
        assert_eq!(recording.tracks().len(), 3);
        assert_eq!(recording.live_tracks(TrackKind::Video), 0);
    }

    #[test]
    fn stop_closes_audio_feed() {
        let track = VirtualTrack::audio("mic");
        let tap = track.audio_tap().unwrap();
        track.stop();
        track.stop();
        assert!(tap.has_changed().is_err());
        assert_eq!(track.stop_calls(), 2);
        assert!(track.is_stopped());
    }
}
