use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::media::devices::DeviceSnapshot;
use crate::media::MediaSessionState;
use crate::models::{Participant, ParticipantField};

/// Transport-agnostic application events.
/// Roster and call-lifecycle events arrive from the socket feed; the rest are
/// emitted by the local media session and consumed by the WebSocket API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AppEvent {
    // Roster feed
    ParticipantJoined { channel_id: String, participant: Participant },
    ParticipantLeft { channel_id: String, participant_id: String },
    ParticipantUpdated { channel_id: String, participant_id: String, change: ParticipantField },
    // Call lifecycle
    CallStarted { channel_id: String, call_type: String, participants: Vec<Participant> },
    CallEnded { channel_id: String },
    // Local media session
    VoiceStateChanged(MediaSessionState),
    SpeakingChanged { participant_id: String, speaking: bool },
    DevicesChanged(DeviceSnapshot),
}

impl AppEvent {
    /// Events that may be injected by the transport (as opposed to emitted locally).
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            AppEvent::ParticipantJoined { .. }
                | AppEvent::ParticipantLeft { .. }
                | AppEvent::ParticipantUpdated { .. }
                | AppEvent::CallStarted { .. }
                | AppEvent::CallEnded { .. }
        )
    }
}

pub type EventSender = broadcast::Sender<AppEvent>;
pub type EventReceiver = broadcast::Receiver<AppEvent>;

pub fn create_event_bus() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}

/// Handle for a spawned event listener. Dropping it ends the listener.
#[derive(Debug)]
pub struct Subscription {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_update_parses_from_socket_json() {
        let json = r#"{"type":"ParticipantUpdated","data":{"channel_id":"c1","participant_id":"p2","change":{"field":"video_enabled","value":true}}}"#;
        let event: AppEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_external());
        match event {
            AppEvent::ParticipantUpdated { participant_id, change, .. } => {
                assert_eq!(participant_id, "p2");
                assert_eq!(change, ParticipantField::VideoEnabled(true));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn local_events_are_not_external() {
        let event = AppEvent::SpeakingChanged { participant_id: "me".into(), speaking: true };
        assert!(!event.is_external());
    }

    #[tokio::test]
    async fn dropping_subscription_aborts_listener() {
        let handle = tokio::spawn(std::future::pending::<()>());
        let sub = Subscription::new("test", handle);
        assert_eq!(sub.name(), "test");
        assert!(!sub.is_finished());
        drop(sub);
    }
}
