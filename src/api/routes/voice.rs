use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::error::MediaError;
use crate::media::devices::DeviceSnapshot;
use crate::media::{MediaSessionState, VolumeDirection};
use crate::models::{DeviceKind, Participant};
use crate::services;
use crate::state::ServiceContext;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn media_error(e: MediaError) -> (StatusCode, String) {
    let status = match &e {
        MediaError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        MediaError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        MediaError::AcquisitionFailed(_) | MediaError::EnumerationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        MediaError::NotOpen | MediaError::Closed => StatusCode::CONFLICT,
    };
    (status, e.to_string())
}

fn not_in_voice() -> (StatusCode, String) {
    media_error(MediaError::NotOpen)
}

#[derive(Deserialize)]
pub struct JoinVoiceRequest {
    pub channel_id: String,
}

pub async fn join_voice(
    State(ctx): State<ServiceContext>,
    Json(body): Json<JoinVoiceRequest>,
) -> ApiResult<MediaSessionState> {
    services::voice::join_voice(&ctx, &body.channel_id)
        .await
        .map(Json)
        .map_err(media_error)
}

pub async fn leave_voice(State(ctx): State<ServiceContext>) -> ApiResult<serde_json::Value> {
    let state = services::voice::leave_voice(&ctx).await;
    Ok(Json(serde_json::json!({ "ok": true, "state": state })))
}

pub async fn get_voice_state(State(ctx): State<ServiceContext>) -> ApiResult<MediaSessionState> {
    services::voice::get_voice_state(&ctx)
        .await
        .map(Json)
        .ok_or_else(not_in_voice)
}

pub async fn toggle_mute(State(ctx): State<ServiceContext>) -> ApiResult<MediaSessionState> {
    let session = services::voice::current_session(&ctx).await.map_err(media_error)?;
    Ok(Json(session.toggle_mute()))
}

pub async fn toggle_deafen(State(ctx): State<ServiceContext>) -> ApiResult<MediaSessionState> {
    let session = services::voice::current_session(&ctx).await.map_err(media_error)?;
    Ok(Json(session.toggle_deafen()))
}

pub async fn toggle_video(State(ctx): State<ServiceContext>) -> ApiResult<serde_json::Value> {
    let session = services::voice::current_session(&ctx).await.map_err(media_error)?;
    let enabled = session.toggle_video().await.map_err(media_error)?;
    Ok(Json(serde_json::json!({ "enabled": enabled, "state": session.state() })))
}

pub async fn toggle_screen_share(State(ctx): State<ServiceContext>) -> ApiResult<serde_json::Value> {
    let session = services::voice::current_session(&ctx).await.map_err(media_error)?;
    let enabled = session.toggle_screen_share().await.map_err(media_error)?;
    Ok(Json(serde_json::json!({ "enabled": enabled, "state": session.state() })))
}

#[derive(Deserialize)]
pub struct SetDeviceRequest {
    pub kind: DeviceKind,
    pub device_id: Option<String>,
}

pub async fn set_device(
    State(ctx): State<ServiceContext>,
    Json(body): Json<SetDeviceRequest>,
) -> ApiResult<serde_json::Value> {
    let state = services::voice::set_device(&ctx, body.kind, body.device_id)
        .await
        .map_err(media_error)?;
    Ok(Json(serde_json::json!({ "ok": true, "state": state })))
}

#[derive(Deserialize)]
pub struct SetVolumeRequest {
    pub direction: VolumeDirection,
    pub value: i32,
}

pub async fn set_volume(
    State(ctx): State<ServiceContext>,
    Json(body): Json<SetVolumeRequest>,
) -> ApiResult<serde_json::Value> {
    let state = services::voice::set_volume(&ctx, body.direction, body.value).await;
    Ok(Json(serde_json::json!({ "ok": true, "state": state })))
}

#[derive(Deserialize)]
pub struct SetProcessingRequest {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

pub async fn set_processing(
    State(ctx): State<ServiceContext>,
    Json(body): Json<SetProcessingRequest>,
) -> ApiResult<serde_json::Value> {
    let state = services::voice::set_processing(
        &ctx,
        body.echo_cancellation,
        body.noise_suppression,
        body.auto_gain_control,
    )
    .await
    .map_err(media_error)?;
    Ok(Json(serde_json::json!({ "ok": true, "state": state })))
}

pub async fn list_devices(State(ctx): State<ServiceContext>) -> ApiResult<DeviceSnapshot> {
    Ok(Json(ctx.devices.snapshot()))
}

pub async fn refresh_devices(State(ctx): State<ServiceContext>) -> ApiResult<DeviceSnapshot> {
    ctx.devices.refresh().await.map(Json).map_err(media_error)
}

pub async fn get_roster(State(ctx): State<ServiceContext>) -> ApiResult<Vec<Participant>> {
    Ok(Json(ctx.roster.participants()))
}
