use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, MediaError};
use crate::events::{AppEvent, EventSender, Subscription};
use crate::models::DeviceKind;

use super::activity::{ActivityEvent, AudioActivityMonitor};
use super::backend::{CaptureBackend, SharedTrack, TrackKind};
use super::devices::DeviceRegistry;
use super::roster::ParticipantRoster;
use super::{clamp_volume, CaptureConstraints, ConnectionState, MediaSessionState, VolumeDirection};

/// Identity and initial levels for one channel membership.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel_id: String,
    pub local_participant_id: String,
    pub input_volume: u8,
    pub output_volume: u8,
}

/// Camera or display capture: an independently owned optional track.
#[derive(Default)]
struct CaptureSlot {
    track: Option<SharedTrack>,
    /// True once a track is adopted.
    enabled: bool,
    /// Latest user intent, set before acquisition resolves.
    wanted: bool,
    /// Bumped on every toggle; an acquisition only lands if it still matches.
    generation: u64,
}

struct SessionInner {
    connection: ConnectionState,
    muted: bool,
    deafened: bool,
    muted_before_deafen: bool,
    input_volume: u8,
    output_volume: u8,
    last_error: Option<ErrorKind>,
    constraints: CaptureConstraints,
    audio: Option<SharedTrack>,
    audio_generation: u64,
    camera: CaptureSlot,
    screen: CaptureSlot,
    connected_at: Option<DateTime<Utc>>,
    subscriptions: Vec<Subscription>,
}

impl SessionInner {
    fn slot_mut(&mut self, kind: TrackKind) -> &mut CaptureSlot {
        match kind {
            TrackKind::Screen => &mut self.screen,
            _ => &mut self.camera,
        }
    }

    /// Everything the session still owns, emptied out of the state.
    fn take_tracks(&mut self) -> Vec<SharedTrack> {
        let mut tracks = Vec::new();
        tracks.extend(self.audio.take());
        tracks.extend(self.camera.track.take());
        tracks.extend(self.screen.track.take());
        tracks
    }
}

struct SessionShared {
    session_id: String,
    config: SessionConfig,
    backend: Arc<dyn CaptureBackend>,
    devices: Arc<DeviceRegistry>,
    roster: ParticipantRoster,
    event_tx: EventSender,
    monitor: AudioActivityMonitor,
    activity_rx: Mutex<Option<mpsc::UnboundedReceiver<ActivityEvent>>>,
    state_tx: watch::Sender<MediaSessionState>,
    inner: Mutex<SessionInner>,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        // Last handle went away without close(): release hardware anyway.
        self.monitor.stop();
        let inner = self.inner.get_mut();
        if inner.connection != ConnectionState::Closed {
            for track in inner.take_tracks() {
                track.stop();
            }
            inner.subscriptions.clear();
            debug!("Voice session {} dropped without close, capture released", self.session_id);
        }
    }
}

/// Local capture for one voice channel membership.
///
/// The session is the only owner of its tracks. Hardware calls (`open`, the
/// enabling half of the video/screen toggles, input device changes) are the
/// only suspension points; every other action is synchronous. Cheap to clone.
#[derive(Clone)]
pub struct MediaSession {
    shared: Arc<SessionShared>,
}

impl MediaSession {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn CaptureBackend>,
        devices: Arc<DeviceRegistry>,
        roster: ParticipantRoster,
        event_tx: EventSender,
    ) -> Self {
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            connection: ConnectionState::Idle,
            muted: false,
            deafened: false,
            muted_before_deafen: false,
            input_volume: config.input_volume.min(100),
            output_volume: config.output_volume.min(100),
            last_error: None,
            constraints: CaptureConstraints::default(),
            audio: None,
            audio_generation: 0,
            camera: CaptureSlot::default(),
            screen: CaptureSlot::default(),
            connected_at: None,
            subscriptions: Vec::new(),
        };
        let session_id = uuid::Uuid::new_v4().to_string();
        let initial = Self::snapshot_of(&session_id, &config, &inner, false);
        let (state_tx, _) = watch::channel(initial);

        Self {
            shared: Arc::new(SessionShared {
                session_id,
                config,
                backend,
                devices,
                roster,
                event_tx,
                monitor: AudioActivityMonitor::new(activity_tx),
                activity_rx: Mutex::new(Some(activity_rx)),
                state_tx,
                inner: Mutex::new(inner),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn channel_id(&self) -> &str {
        &self.shared.config.channel_id
    }

    pub fn state(&self) -> MediaSessionState {
        let inner = self.shared.inner.lock();
        self.snapshot(&inner)
    }

    /// Receiver that sees every published state.
    pub fn subscribe(&self) -> watch::Receiver<MediaSessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn activity_monitor(&self) -> &AudioActivityMonitor {
        &self.shared.monitor
    }

    /// Hand a listener to the session; it is dropped on `close()`.
    pub fn attach(&self, subscription: Subscription) {
        let mut inner = self.shared.inner.lock();
        if inner.connection == ConnectionState::Closed {
            return;
        }
        debug!("Attached {} subscription to session {}", subscription.name(), self.id());
        inner.subscriptions.push(subscription);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Acquire the microphone under `constraints`. A no-op while already
    /// acquiring or active; retries from `idle` or `error`.
    ///
    /// Capture settings changed while the acquisition is pending are picked up
    /// by acquiring again, so an active session always runs on the track its
    /// published constraints describe.
    pub async fn open(&self, constraints: CaptureConstraints) -> Result<MediaSessionState, MediaError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            match inner.connection {
                ConnectionState::Active | ConnectionState::Acquiring => return Ok(self.snapshot(&inner)),
                ConnectionState::Closed => return Err(MediaError::Closed),
                ConnectionState::Idle | ConnectionState::Error => {}
            }
            inner.connection = ConnectionState::Acquiring;
            inner.constraints = constraints.clone();
            inner.last_error = None;
            inner.audio_generation += 1;
            self.publish(&mut inner);
            inner.audio_generation
        };
        self.spawn_activity_listener();

        let mut requested = constraints;
        let state = loop {
            info!("Acquiring microphone for channel {}", self.channel_id());
            let result = self.shared.backend.acquire_audio(&requested).await;

            let mut inner = self.shared.inner.lock();
            let stale = inner.audio_generation != generation || inner.connection != ConnectionState::Acquiring;
            if stale {
                drop(inner);
                if let Ok(track) = result {
                    debug!("Releasing microphone track {} from superseded open", track.id());
                    track.stop();
                }
                return Ok(self.state());
            }

            if inner.constraints.audio_differs(&requested) {
                requested = inner.constraints.clone();
                drop(inner);
                if let Ok(track) = result {
                    debug!("Capture settings changed while acquiring, releasing track {}", track.id());
                    track.stop();
                }
                continue;
            }

            let track = match result {
                Ok(track) => track,
                Err(e) => {
                    error!("Failed to start audio capture: {}", e);
                    inner.connection = ConnectionState::Error;
                    inner.last_error = e.kind();
                    self.publish(&mut inner);
                    return Err(e);
                }
            };

            track.set_enabled(!inner.muted);
            if !inner.muted {
                if let Err(e) = self.shared.monitor.start(&track) {
                    error!("Failed to analyse microphone track: {}", e);
                    track.stop();
                    inner.connection = ConnectionState::Error;
                    inner.last_error = e.kind();
                    self.publish(&mut inner);
                    return Err(e);
                }
            }

            info!("Audio capture started: {} ({})", track.label(), track.id());
            inner.audio = Some(track);
            inner.connection = ConnectionState::Active;
            inner.connected_at = Some(Utc::now());
            break self.publish(&mut inner);
        };

        // Labels usually become readable after the first successful capture.
        if self.shared.devices.needs_labels() {
            if let Err(e) = self.shared.devices.refresh().await {
                warn!("Device refresh after capture failed: {}", e);
            }
        }
        Ok(state)
    }

    /// Release everything. Safe to call any number of times, in any state.
    pub fn close(&self) -> MediaSessionState {
        let subscriptions = {
            let mut guard = self.shared.inner.lock();
            let inner = &mut *guard;
            if inner.connection == ConnectionState::Closed {
                return self.snapshot(inner);
            }

            self.shared.monitor.stop();
            for track in inner.take_tracks() {
                debug!("Stopping {:?} track {}", track.kind(), track.id());
                track.stop();
            }

            inner.audio_generation += 1;
            for slot in [&mut inner.camera, &mut inner.screen] {
                slot.generation += 1;
                slot.enabled = false;
                slot.wanted = false;
            }
            inner.connection = ConnectionState::Closed;
            inner.connected_at = None;
            self.publish(inner);
            std::mem::take(&mut inner.subscriptions)
        };
        drop(subscriptions);
        info!("Voice session {} closed", self.id());
        self.state()
    }

    // ------------------------------------------------------------------
    // Mute / deafen
    // ------------------------------------------------------------------

    /// Unmuting while deafened also undeafens.
    pub fn toggle_mute(&self) -> MediaSessionState {
        let mut inner = self.shared.inner.lock();
        if inner.connection == ConnectionState::Closed {
            return self.snapshot(&inner);
        }
        if inner.muted {
            if inner.deafened {
                inner.deafened = false;
            }
            inner.muted = false;
        } else {
            inner.muted = true;
        }
        info!("Mute set to {}", inner.muted);
        self.apply_mute(&mut inner);
        self.publish(&mut inner)
    }

    /// Deafening forces mute; undeafening restores whatever mute state was in
    /// place before.
    pub fn toggle_deafen(&self) -> MediaSessionState {
        let mut inner = self.shared.inner.lock();
        if inner.connection == ConnectionState::Closed {
            return self.snapshot(&inner);
        }
        if inner.deafened {
            inner.deafened = false;
            inner.muted = inner.muted_before_deafen;
        } else {
            inner.muted_before_deafen = inner.muted;
            inner.deafened = true;
            inner.muted = true;
        }
        info!("Deafen set to {}", inner.deafened);
        self.apply_mute(&mut inner);
        self.publish(&mut inner)
    }

    fn apply_mute(&self, inner: &mut SessionInner) {
        if inner.muted {
            self.shared.monitor.stop();
        }
        let Some(track) = inner.audio.clone() else {
            return;
        };
        track.set_enabled(!inner.muted);
        if inner.muted || inner.connection != ConnectionState::Active {
            return;
        }
        // Nothing watches the track while muted, so a loss shows up here.
        if !track.is_live() {
            warn!("Microphone track {} ended while muted", track.id());
            self.fail_audio(inner);
        } else if let Err(e) = self.shared.monitor.start(&track) {
            warn!("Could not resume activity monitor: {}", e);
            self.fail_audio(inner);
        }
    }

    // ------------------------------------------------------------------
    // Camera / screen
    // ------------------------------------------------------------------

    /// Returns whether video is enabled after the call.
    pub async fn toggle_video(&self) -> Result<bool, MediaError> {
        self.toggle_capture(TrackKind::Video).await
    }

    /// Returns whether screen sharing is enabled after the call.
    pub async fn toggle_screen_share(&self) -> Result<bool, MediaError> {
        self.toggle_capture(TrackKind::Screen).await
    }

    async fn toggle_capture(&self, kind: TrackKind) -> Result<bool, MediaError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            match inner.connection {
                ConnectionState::Closed => return Err(MediaError::Closed),
                ConnectionState::Idle => return Err(MediaError::NotOpen),
                _ => {}
            }

            let slot = inner.slot_mut(kind);
            slot.generation += 1;
            if slot.wanted {
                // Disable: flip first, release after the lock is gone. A pending
                // enable sees the new generation and releases its own result.
                slot.wanted = false;
                slot.enabled = false;
                let track = slot.track.take();
                self.publish(&mut inner);
                drop(inner);
                if let Some(track) = track {
                    track.stop();
                    info!("{} disabled", Self::capture_name(kind));
                }
                return Ok(false);
            }
            slot.wanted = true;
            slot.generation
        };

        let result = match kind {
            TrackKind::Screen => self.shared.backend.acquire_display().await,
            _ => self.shared.backend.acquire_camera().await,
        };

        let mut inner = self.shared.inner.lock();
        let closed = inner.connection == ConnectionState::Closed;
        let slot = inner.slot_mut(kind);
        if closed || slot.generation != generation {
            let enabled = slot.enabled;
            drop(inner);
            if let Ok(track) = result {
                debug!("Releasing superseded {} track {}", Self::capture_name(kind), track.id());
                track.stop();
            }
            return if closed { Err(MediaError::Closed) } else { Ok(enabled) };
        }

        match result {
            Ok(track) => {
                info!("{} enabled: {}", Self::capture_name(kind), track.label());
                slot.track = Some(track);
                slot.enabled = true;
                self.publish(&mut inner);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to enable {}: {}", Self::capture_name(kind), e);
                slot.wanted = false;
                slot.enabled = false;
                inner.last_error = e.kind();
                self.publish(&mut inner);
                Err(e)
            }
        }
    }

    fn capture_name(kind: TrackKind) -> &'static str {
        match kind {
            TrackKind::Screen => "Screen sharing",
            TrackKind::Video => "Camera",
            TrackKind::Audio => "Microphone",
        }
    }

    // ------------------------------------------------------------------
    // Devices, constraints, volume
    // ------------------------------------------------------------------

    /// Select an input or output device. Input changes re-acquire the
    /// microphone; output changes only affect playback routing.
    pub async fn set_device(&self, kind: DeviceKind, device_id: Option<String>) -> Result<MediaSessionState, MediaError> {
        match kind {
            DeviceKind::Input => {
                let mut constraints = self.state().constraints;
                constraints.input_device_id = device_id;
                self.update_constraints(constraints).await
            }
            DeviceKind::Output => {
                let mut inner = self.shared.inner.lock();
                if inner.connection == ConnectionState::Closed {
                    return Err(MediaError::Closed);
                }
                if let Some(id) = device_id.as_deref() {
                    if self.shared.devices.contains(DeviceKind::Output, id) == Some(false) {
                        warn!("Output device {} is not available", id);
                        inner.last_error = Some(ErrorKind::DeviceNotFound);
                        self.publish(&mut inner);
                        return Err(MediaError::DeviceNotFound(id.to_string()));
                    }
                }
                info!("Output device set to {:?}", device_id);
                inner.constraints.output_device_id = device_id;
                Ok(self.publish(&mut inner))
            }
        }
    }

    /// Replace the capture constraints. While active, a new microphone track is
    /// acquired and swapped in; on failure the current track and constraints stay.
    pub async fn update_constraints(&self, constraints: CaptureConstraints) -> Result<MediaSessionState, MediaError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.connection == ConnectionState::Closed {
                return Err(MediaError::Closed);
            }
            if inner.constraints == constraints {
                return Ok(self.snapshot(&inner));
            }
            if !inner.constraints.audio_differs(&constraints) || inner.connection != ConnectionState::Active {
                // Nothing live to re-acquire. A pending open() notices the
                // change and acquires again; otherwise the next open() uses these.
                inner.constraints = constraints;
                return Ok(self.publish(&mut inner));
            }
            inner.audio_generation += 1;
            inner.audio_generation
        };

        info!("Re-acquiring microphone for new capture settings");
        let result = self.shared.backend.acquire_audio(&constraints).await;

        let mut inner = self.shared.inner.lock();
        if inner.audio_generation != generation || inner.connection != ConnectionState::Active {
            let closed = inner.connection == ConnectionState::Closed;
            drop(inner);
            if let Ok(track) = result {
                debug!("Releasing superseded microphone track {}", track.id());
                track.stop();
            }
            return if closed { Err(MediaError::Closed) } else { Ok(self.state()) };
        }

        let track = match result {
            Ok(track) => track,
            Err(e) => {
                error!("Failed to switch microphone: {}", e);
                inner.last_error = e.kind();
                self.publish(&mut inner);
                return Err(e);
            }
        };

        self.shared.monitor.stop();
        track.set_enabled(!inner.muted);
        if !inner.muted {
            if let Err(e) = self.shared.monitor.start(&track) {
                error!("Failed to analyse new microphone track: {}", e);
                track.stop();
                inner.last_error = e.kind();
                if let Some(old) = inner.audio.clone() {
                    if let Err(resume) = self.shared.monitor.start(&old) {
                        warn!("Could not resume analysis on previous microphone: {}", resume);
                        self.fail_audio(&mut inner);
                    }
                }
                self.publish(&mut inner);
                return Err(e);
            }
        }

        info!("Switched microphone to {} ({})", track.label(), track.id());
        let old = inner.audio.replace(track);
        inner.constraints = constraints;
        let state = self.publish(&mut inner);
        drop(inner);
        if let Some(old) = old {
            old.stop();
        }
        Ok(state)
    }

    pub fn set_volume(&self, direction: VolumeDirection, value: i32) -> MediaSessionState {
        let mut inner = self.shared.inner.lock();
        if inner.connection == ConnectionState::Closed {
            return self.snapshot(&inner);
        }
        let volume = clamp_volume(value);
        match direction {
            VolumeDirection::Input => inner.input_volume = volume,
            VolumeDirection::Output => inner.output_volume = volume,
        }
        self.publish(&mut inner)
    }

    // ------------------------------------------------------------------
    // Activity
    // ------------------------------------------------------------------

    fn spawn_activity_listener(&self) {
        let Some(mut activity_rx) = self.shared.activity_rx.lock().take() else {
            return;
        };
        let weak: Weak<SessionShared> = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            while let Some(event) = activity_rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                MediaSession { shared }.handle_activity(event);
            }
        });
        self.attach(Subscription::new("activity", handle));
    }

    fn handle_activity(&self, event: ActivityEvent) {
        let mut inner = self.shared.inner.lock();
        match event {
            ActivityEvent::Speaking(_) => {
                // The monitor holds the flag; publishing picks it up.
                self.publish(&mut inner);
            }
            ActivityEvent::SourceEnded { track_id } => {
                let current = inner.audio.as_ref().is_some_and(|t| t.id() == track_id);
                if !current || inner.connection != ConnectionState::Active {
                    return;
                }
                warn!("Microphone track {} ended unexpectedly", track_id);
                self.fail_audio(&mut inner);
                self.publish(&mut inner);
            }
        }
    }

    /// The microphone is gone: release it and move `active → error`.
    fn fail_audio(&self, inner: &mut SessionInner) {
        self.shared.monitor.stop();
        if let Some(track) = inner.audio.take() {
            track.stop();
        }
        inner.audio_generation += 1;
        inner.connection = ConnectionState::Error;
        inner.last_error = Some(ErrorKind::AcquisitionFailed);
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    fn snapshot(&self, inner: &SessionInner) -> MediaSessionState {
        let speaking = !inner.muted
            && inner.connection == ConnectionState::Active
            && self.shared.monitor.is_speaking();
        Self::snapshot_of(&self.shared.session_id, &self.shared.config, inner, speaking)
    }

    fn snapshot_of(session_id: &str, config: &SessionConfig, inner: &SessionInner, speaking: bool) -> MediaSessionState {
        MediaSessionState {
            session_id: session_id.to_string(),
            channel_id: config.channel_id.clone(),
            connection_state: inner.connection,
            muted: inner.muted,
            deafened: inner.deafened,
            video_enabled: inner.camera.enabled,
            screen_sharing: inner.screen.enabled,
            speaking,
            input_volume: inner.input_volume,
            output_volume: inner.output_volume,
            last_error: inner.last_error,
            constraints: inner.constraints.clone(),
            applied_processing: inner.audio.as_ref().map(|track| track.applied_processing()),
            connected_at: inner.connected_at,
        }
    }

    /// Push the current state to watchers, the roster and the event bus.
    fn publish(&self, inner: &mut SessionInner) -> MediaSessionState {
        let state = self.snapshot(inner);
        let previous = self.shared.state_tx.send_replace(state.clone());
        self.shared.roster.sync_local(&state);
        if previous.speaking != state.speaking {
            let _ = self.shared.event_tx.send(AppEvent::SpeakingChanged {
                participant_id: self.shared.config.local_participant_id.clone(),
                speaking: state.speaking,
            });
        }
        if previous != state {
            let _ = self.shared.event_tx.send(AppEvent::VoiceStateChanged(state.clone()));
        }
        state
    }
}
