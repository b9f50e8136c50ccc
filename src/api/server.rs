use axum::{routing::{get, post, put}, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{routes, websocket};
use crate::state::ServiceContext;

pub fn build_router(ctx: ServiceContext) -> Router {
    Router::new()
        // Identity
        .route("/api/v1/identity", get(routes::identity::get_identity))
        .route("/api/v1/identity/display-name", put(routes::identity::set_display_name))
        // Settings
        .route("/api/v1/settings", get(routes::settings::get_all_settings))
        .route(
            "/api/v1/settings/:key",
            get(routes::settings::get_setting)
                .put(routes::settings::set_setting)
                .delete(routes::settings::delete_setting),
        )
        // Voice session
        .route("/api/v1/voice/join", post(routes::voice::join_voice))
        .route("/api/v1/voice/leave", post(routes::voice::leave_voice))
        .route("/api/v1/voice/state", get(routes::voice::get_voice_state))
        .route("/api/v1/voice/settings", get(routes::settings::get_voice_settings))
        .route("/api/v1/voice/mute/toggle", post(routes::voice::toggle_mute))
        .route("/api/v1/voice/deafen/toggle", post(routes::voice::toggle_deafen))
        .route("/api/v1/voice/video/toggle", post(routes::voice::toggle_video))
        .route("/api/v1/voice/screen/toggle", post(routes::voice::toggle_screen_share))
        .route("/api/v1/voice/device", put(routes::voice::set_device))
        .route("/api/v1/voice/volume", put(routes::voice::set_volume))
        .route("/api/v1/voice/processing", put(routes::voice::set_processing))
        // Devices & roster
        .route("/api/v1/voice/devices", get(routes::voice::list_devices))
        .route("/api/v1/voice/devices/refresh", post(routes::voice::refresh_devices))
        .route("/api/v1/voice/roster", get(routes::voice::get_roster))
        // WebSocket
        .route("/ws", get(websocket::ws_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub async fn start_api_server(ctx: ServiceContext, port: u16) {
    let router = build_router(ctx);
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind API server");
    info!("API server listening on http://{}", addr);
    axum::serve(listener, router)
        .await
        .expect("API server error");
}
