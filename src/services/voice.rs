use tracing::{info, warn};

use crate::error::MediaError;
use crate::media::{
    clamp_volume, CaptureConstraints, ConnectionState, MediaSession, MediaSessionState, SessionConfig, VolumeDirection,
};
use crate::models::{DeviceKind, Participant};
use crate::services::settings::{self, VoiceSettings};
use crate::state::ServiceContext;

fn load_settings(ctx: &ServiceContext) -> VoiceSettings {
    settings::load_voice_settings(ctx).unwrap_or_else(|e| {
        warn!("Failed to load voice settings, using defaults: {}", e);
        VoiceSettings::default()
    })
}

fn persist(result: Result<(), String>) {
    if let Err(e) = result {
        warn!("Failed to save voice setting: {}", e);
    }
}

/// Join `channel_id`. A session on another channel is closed first; joining
/// the channel already joined returns its state (retrying capture if the
/// previous attempt failed).
pub async fn join_voice(ctx: &ServiceContext, channel_id: &str) -> Result<MediaSessionState, MediaError> {
    let voice = load_settings(ctx);

    let session = {
        let mut slot = ctx.voice.lock().await;
        let reusable = slot
            .as_ref()
            .filter(|s| s.channel_id() == channel_id && s.state().connection_state != ConnectionState::Closed)
            .cloned();

        match reusable {
            Some(session) => session,
            None => {
                if let Some(previous) = slot.take() {
                    info!("Leaving voice channel {} to join {}", previous.channel_id(), channel_id);
                    previous.close();
                }

                let display_name = ctx.db.get_display_name().unwrap_or_else(|_| "Anonymous".to_string());
                ctx.roster
                    .reset(channel_id, Participant::new(ctx.participant_id.clone(), display_name));

                let session = MediaSession::new(
                    SessionConfig {
                        channel_id: channel_id.to_string(),
                        local_participant_id: ctx.participant_id.clone(),
                        input_volume: voice.input_volume,
                        output_volume: voice.output_volume,
                    },
                    ctx.backend.clone(),
                    ctx.devices.clone(),
                    ctx.roster.clone(),
                    ctx.event_tx.clone(),
                );
                session.attach(ctx.roster.subscribe(ctx.event_tx.subscribe()));
                *slot = Some(session.clone());
                info!("Joining voice channel {}", channel_id);
                session
            }
        }
    };

    session.open(voice.constraints()).await
}

/// Leave the current channel. Returns the final state, or `None` if not in one.
pub async fn leave_voice(ctx: &ServiceContext) -> Option<MediaSessionState> {
    let session = ctx.voice.lock().await.take()?;
    let state = session.close();
    ctx.roster.clear();
    info!("Left voice channel {}", session.channel_id());
    Some(state)
}

pub async fn current_session(ctx: &ServiceContext) -> Result<MediaSession, MediaError> {
    ctx.voice.lock().await.clone().ok_or(MediaError::NotOpen)
}

pub async fn get_voice_state(ctx: &ServiceContext) -> Option<MediaSessionState> {
    ctx.voice.lock().await.as_ref().map(|s| s.state())
}

/// Select a device. Applied to the live session when there is one, then saved.
pub async fn set_device(
    ctx: &ServiceContext,
    kind: DeviceKind,
    device_id: Option<String>,
) -> Result<Option<MediaSessionState>, MediaError> {
    let state = match current_session(ctx).await {
        Ok(session) => Some(session.set_device(kind, device_id.clone()).await?),
        Err(_) => {
            if let Some(id) = device_id.as_deref() {
                if ctx.devices.contains(kind, id) == Some(false) {
                    return Err(MediaError::DeviceNotFound(id.to_string()));
                }
            }
            None
        }
    };
    persist(settings::save_device(ctx, kind, device_id.as_deref()));
    Ok(state)
}

pub async fn set_volume(ctx: &ServiceContext, direction: VolumeDirection, value: i32) -> Option<MediaSessionState> {
    let state = current_session(ctx).await.ok().map(|s| s.set_volume(direction, value));
    persist(settings::save_volume(ctx, direction, clamp_volume(value)));
    state
}

/// Change the audio processing flags, keeping the current device selection.
pub async fn set_processing(
    ctx: &ServiceContext,
    echo_cancellation: bool,
    noise_suppression: bool,
    auto_gain_control: bool,
) -> Result<Option<MediaSessionState>, MediaError> {
    let apply = |base: CaptureConstraints| CaptureConstraints {
        echo_cancellation,
        noise_suppression,
        auto_gain_control,
        ..base
    };

    let (state, constraints) = match current_session(ctx).await {
        Ok(session) => {
            let constraints = apply(session.state().constraints);
            let state = session.update_constraints(constraints.clone()).await?;
            (Some(state), constraints)
        }
        Err(_) => (None, apply(load_settings(ctx).constraints())),
    };
    persist(settings::save_processing(ctx, &constraints));
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::media::virtual_backend::{CaptureSource, VirtualBackend};
    use crate::media::TrackKind;
    use std::sync::Arc;

    fn ctx_with(backend: &VirtualBackend) -> ServiceContext {
        let (event_tx, _) = crate::events::create_event_bus();
        ServiceContext::new(
            Arc::new(Database::open_in_memory().unwrap()),
            "me".into(),
            Arc::new(backend.clone()),
            event_tx,
        )
    }

    #[tokio::test]
    async fn join_uses_saved_settings() {
        let backend = VirtualBackend::with_default_devices();
        let ctx = ctx_with(&backend);
        settings::set_setting(&ctx, settings::INPUT_VOLUME, "40").unwrap();
        settings::set_setting(&ctx, settings::SELECTED_INPUT_DEVICE, "virtual-mic-1").unwrap();
        settings::set_setting(&ctx, settings::NOISE_SUPPRESSION, "false").unwrap();

        let state = join_voice(&ctx, "voice-1").await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Active);
        assert_eq!(state.input_volume, 40);
        assert_eq!(state.constraints.input_device_id.as_deref(), Some("virtual-mic-1"));
        assert!(!state.constraints.noise_suppression);
        assert_eq!(ctx.roster.local().unwrap().id, "me");
    }

    #[tokio::test]
    async fn joining_same_channel_is_idempotent() {
        let backend = VirtualBackend::with_default_devices();
        let ctx = ctx_with(&backend);
        let first = join_voice(&ctx, "voice-1").await.unwrap();
        let second = join_voice(&ctx, "voice-1").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(backend.acquisitions(CaptureSource::Microphone), 1);
    }

    #[tokio::test]
    async fn switching_channels_closes_previous_session() {
        let backend = VirtualBackend::with_default_devices();
        let ctx = ctx_with(&backend);
        let first = join_voice(&ctx, "voice-1").await.unwrap();
        let second = join_voice(&ctx, "voice-2").await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 1);
        assert_eq!(ctx.roster.channel_id().as_deref(), Some("voice-2"));

        let left = leave_voice(&ctx).await.unwrap();
        assert_eq!(left.connection_state, ConnectionState::Closed);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 0);
        assert!(leave_voice(&ctx).await.is_none());
        assert!(ctx.roster.channel_id().is_none());
    }

    #[tokio::test]
    async fn failed_join_can_be_retried() {
        let backend = VirtualBackend::with_default_devices();
        let ctx = ctx_with(&backend);
        backend.fail_next(CaptureSource::Microphone, MediaError::PermissionDenied("blocked".into()));

        let err = join_voice(&ctx, "voice-1").await.unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied(_)));
        assert_eq!(get_voice_state(&ctx).await.unwrap().connection_state, ConnectionState::Error);

        let state = join_voice(&ctx, "voice-1").await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Active);
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn setters_persist_without_a_session() {
        let backend = VirtualBackend::with_default_devices();
        let ctx = ctx_with(&backend);

        assert!(set_volume(&ctx, VolumeDirection::Input, 300).await.is_none());
        assert!(set_processing(&ctx, false, true, false).await.unwrap().is_none());
        assert!(set_device(&ctx, DeviceKind::Output, Some("virtual-out-1".into())).await.unwrap().is_none());

        let saved = settings::load_voice_settings(&ctx).unwrap();
        assert_eq!(saved.input_volume, 100);
        assert!(!saved.echo_cancellation);
        assert!(!saved.auto_gain_control);
        assert_eq!(saved.output_device_id.as_deref(), Some("virtual-out-1"));
    }

    #[tokio::test]
    async fn failed_device_switch_is_not_saved() {
        let backend = VirtualBackend::with_default_devices();
        let ctx = ctx_with(&backend);
        join_voice(&ctx, "voice-1").await.unwrap();

        let err = set_device(&ctx, DeviceKind::Input, Some("missing-mic".into())).await.unwrap_err();
        assert!(matches!(err, MediaError::DeviceNotFound(_)));
        assert_eq!(settings::get_setting(&ctx, settings::SELECTED_INPUT_DEVICE).unwrap(), None);

        let state = set_device(&ctx, DeviceKind::Input, Some("virtual-mic-1".into())).await.unwrap().unwrap();
        assert_eq!(state.constraints.input_device_id.as_deref(), Some("virtual-mic-1"));
        assert_eq!(
            settings::get_setting(&ctx, settings::SELECTED_INPUT_DEVICE).unwrap().as_deref(),
            Some("virtual-mic-1")
        );
    }
}
