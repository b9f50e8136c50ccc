use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::models::Setting;
use crate::services;
use crate::services::settings::VoiceSettings;
use crate::state::ServiceContext;

pub async fn get_all_settings(
    State(ctx): State<ServiceContext>,
) -> Result<Json<Vec<Setting>>, (StatusCode, String)> {
    services::settings::get_all_settings(&ctx)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

pub async fn get_setting(
    State(ctx): State<ServiceContext>,
    Path(key): Path<String>,
) -> Result<Json<Setting>, (StatusCode, String)> {
    match services::settings::get_setting(&ctx, &key) {
        Ok(Some(value)) => Ok(Json(Setting { key, value })),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("No setting named {}", key))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

#[derive(Deserialize)]
pub struct SetSettingRequest {
    pub value: String,
}

pub async fn set_setting(
    State(ctx): State<ServiceContext>,
    Path(key): Path<String>,
    Json(body): Json<SetSettingRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    services::settings::set_setting(&ctx, &key, &body.value)
        .map(|_| Json(serde_json::json!({"ok": true})))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

pub async fn delete_setting(
    State(ctx): State<ServiceContext>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    services::settings::delete_setting(&ctx, &key)
        .map(|_| Json(serde_json::json!({"ok": true})))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

/// The voice preferences as the next join would apply them.
pub async fn get_voice_settings(
    State(ctx): State<ServiceContext>,
) -> Result<Json<VoiceSettings>, (StatusCode, String)> {
    services::settings::load_voice_settings(&ctx)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}
