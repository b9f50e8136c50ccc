use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::models::Identity;
use crate::services::identity;
use crate::state::ServiceContext;

pub async fn get_identity(State(ctx): State<ServiceContext>) -> Result<Json<Identity>, (StatusCode, String)> {
    identity::get_identity(&ctx)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

/// Rename the local participant and return the updated identity.
pub async fn set_display_name(
    State(ctx): State<ServiceContext>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<Identity>, (StatusCode, String)> {
    identity::set_display_name(&ctx, &body.name).map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    identity::get_identity(&ctx)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}
