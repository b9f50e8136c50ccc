use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::db::Database;
use crate::events::EventSender;
use crate::media::{CaptureBackend, DeviceRegistry, MediaSession, ParticipantRoster};

/// Transport-agnostic context shared by services and API routes.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<Database>,
    pub participant_id: String,
    pub backend: Arc<dyn CaptureBackend>,
    pub devices: Arc<DeviceRegistry>,
    pub roster: ParticipantRoster,
    pub event_tx: EventSender,
    /// The current voice session, if any. At most one at a time.
    pub voice: Arc<TokioMutex<Option<MediaSession>>>,
}

impl ServiceContext {
    pub fn new(db: Arc<Database>, participant_id: String, backend: Arc<dyn CaptureBackend>, event_tx: EventSender) -> Self {
        let devices = Arc::new(DeviceRegistry::new(backend.clone(), Some(event_tx.clone())));
        Self {
            db,
            participant_id,
            backend,
            devices,
            roster: ParticipantRoster::new(),
            event_tx,
            voice: Arc::new(TokioMutex::new(None)),
        }
    }
}
