mod api;
mod db;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
mod services;
mod state;

use directories::ProjectDirs;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::Database;
use crate::events::create_event_bus;
use crate::media::virtual_backend::VirtualBackend;
use crate::media::CaptureBackend;
use crate::state::ServiceContext;

/// Which capture implementation the headless server drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackendKind {
    /// In-memory devices and tracks.
    #[default]
    Virtual,
    /// Real microphone, camera and screen (needs the `native-capture` feature).
    Native,
}

fn get_data_dir(custom_dir: Option<&str>) -> std::path::PathBuf {
    if let Some(dir) = custom_dir {
        std::path::PathBuf::from(dir)
    } else {
        ProjectDirs::from("com", "chatr", "Chatr")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from(".chatr"))
    }
}

fn get_or_create_participant_id(db: &Database) -> String {
    if let Ok(Some(id)) = db.load_participant_id() {
        info!("Loaded existing participant id");
        return id;
    }

    let id = uuid::Uuid::new_v4().to_string();
    db.save_participant_id(&id).expect("Failed to save participant id");
    info!("Generated new participant id");
    id
}

fn create_backend(kind: BackendKind) -> Arc<dyn CaptureBackend> {
    match kind {
        BackendKind::Virtual => {
            info!("Using virtual capture backend");
            Arc::new(VirtualBackend::with_default_devices())
        }
        #[cfg(feature = "native-capture")]
        BackendKind::Native => {
            info!("Using native capture backend");
            Arc::new(media::native::NativeBackend::new())
        }
        #[cfg(not(feature = "native-capture"))]
        BackendKind::Native => {
            warn!("Built without the native-capture feature, falling back to the virtual backend");
            Arc::new(VirtualBackend::with_default_devices())
        }
    }
}

fn create_service_context(data_dir: Option<&str>, backend: BackendKind) -> ServiceContext {
    let data_dir = get_data_dir(data_dir);
    info!("Data directory: {:?}", data_dir);

    let db = Arc::new(Database::new(&data_dir).expect("Failed to initialize database"));
    let participant_id = get_or_create_participant_id(&db);
    info!("My participant ID: {}", participant_id);

    let (event_tx, _event_rx) = create_event_bus();
    ServiceContext::new(db, participant_id, create_backend(backend), event_tx)
}

/// Run the headless voice server (API + WebSocket only).
pub async fn run_headless(data_dir: Option<&str>, api_port: u16, backend: BackendKind) {
    tracing_subscriber::fmt::init();

    let ctx = create_service_context(data_dir, backend);

    if let Err(e) = ctx.devices.refresh().await {
        warn!("Initial device listing failed: {}", e);
    }

    info!("Running in headless mode");

    // Run API server (blocks until shutdown)
    api::server::start_api_server(ctx, api_port).await;
}
