use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{AppEvent, EventReceiver, Subscription};
use crate::models::Participant;

use super::MediaSessionState;

#[derive(Default)]
struct RosterInner {
    channel_id: Option<String>,
    local_id: Option<String>,
    participants: HashMap<String, Participant>,
    /// Join order for stable rendering.
    order: Vec<String>,
}

impl RosterInner {
    fn insert(&mut self, participant: Participant) {
        if !self.participants.contains_key(&participant.id) {
            self.order.push(participant.id.clone());
        }
        self.participants.insert(participant.id.clone(), participant);
    }

    fn remove(&mut self, id: &str) -> bool {
        self.order.retain(|p| p != id);
        self.participants.remove(id).is_some()
    }

    fn clear_remote(&mut self) {
        let local = self.local_id.clone();
        self.participants.retain(|id, _| Some(id) == local.as_ref());
        self.order.retain(|id| Some(id) == local.as_ref());
    }

    fn is_local(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }
}

/// Per-channel participant call state.
///
/// Remote entries come only from roster/call events. The local entry is owned
/// by the media session and mirrored through [`ParticipantRoster::sync_local`];
/// feed events that target it are ignored.
#[derive(Clone, Default)]
pub struct ParticipantRoster {
    inner: Arc<RwLock<RosterInner>>,
}

impl ParticipantRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `channel_id` with an empty remote roster.
    pub fn reset(&self, channel_id: &str, local: Participant) {
        let mut inner = self.inner.write();
        inner.participants.clear();
        inner.order.clear();
        inner.channel_id = Some(channel_id.to_string());
        inner.local_id = Some(local.id.clone());
        inner.insert(local);
    }

    /// Forget the channel entirely (after leaving).
    pub fn clear(&self) {
        *self.inner.write() = RosterInner::default();
    }

    pub fn channel_id(&self) -> Option<String> {
        self.inner.read().channel_id.clone()
    }

    /// Apply a feed event. Returns true if the roster changed.
    pub fn apply(&self, event: &AppEvent) -> bool {
        let mut inner = self.inner.write();
        let Some(current) = inner.channel_id.clone() else {
            return false;
        };

        match event {
            AppEvent::ParticipantJoined { channel_id, participant } if *channel_id == current => {
                if inner.is_local(&participant.id) {
                    return false;
                }
                debug!("Participant {} joined {}", participant.id, channel_id);
                inner.insert(participant.clone());
                true
            }
            AppEvent::ParticipantLeft { channel_id, participant_id } if *channel_id == current => {
                if inner.is_local(participant_id) {
                    return false;
                }
                debug!("Participant {} left {}", participant_id, channel_id);
                inner.remove(participant_id)
            }
            AppEvent::ParticipantUpdated { channel_id, participant_id, change } if *channel_id == current => {
                if inner.is_local(participant_id) {
                    return false;
                }
                match inner.participants.get_mut(participant_id) {
                    Some(participant) => {
                        participant.apply(change);
                        true
                    }
                    None => {
                        debug!("Update for unknown participant {}", participant_id);
                        false
                    }
                }
            }
            AppEvent::CallStarted { channel_id, call_type, participants } if *channel_id == current => {
                info!("Call started in {} ({}, {} participants)", channel_id, call_type, participants.len());
                inner.clear_remote();
                for participant in participants {
                    if !inner.is_local(&participant.id) {
                        inner.insert(participant.clone());
                    }
                }
                true
            }
            AppEvent::CallEnded { channel_id } if *channel_id == current => {
                info!("Call ended in {}", channel_id);
                inner.clear_remote();
                true
            }
            _ => false,
        }
    }

    /// Mirror the local session state into the local participant entry.
    pub fn sync_local(&self, state: &MediaSessionState) {
        let mut inner = self.inner.write();
        let Some(local_id) = inner.local_id.clone() else {
            return;
        };
        if let Some(local) = inner.participants.get_mut(&local_id) {
            local.muted = state.muted;
            local.deafened = state.deafened;
            local.video_enabled = state.video_enabled;
            local.screen_sharing = state.screen_sharing;
            local.speaking = state.speaking;
        }
    }

    pub fn set_local_display_name(&self, name: &str) {
        let mut inner = self.inner.write();
        let Some(local_id) = inner.local_id.clone() else {
            return;
        };
        if let Some(local) = inner.participants.get_mut(&local_id) {
            local.display_name = name.to_string();
        }
    }

    pub fn get(&self, id: &str) -> Option<Participant> {
        self.inner.read().participants.get(id).cloned()
    }

    pub fn local(&self) -> Option<Participant> {
        let inner = self.inner.read();
        inner.local_id.as_ref().and_then(|id| inner.participants.get(id).cloned())
    }

    /// Participants in join order.
    pub fn participants(&self) -> Vec<Participant> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.participants.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pump feed events from `event_rx` into the roster until the returned
    /// handle is dropped.
    pub fn subscribe(&self, mut event_rx: EventReceiver) -> Subscription {
        let roster = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        if event.is_external() {
                            roster.apply(&event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Roster feed lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new("roster", handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParticipantField, Role};

    fn roster() -> ParticipantRoster {
        let roster = ParticipantRoster::new();
        roster.reset("voice-1", Participant::new("me", "Me"));
        roster
    }

    fn joined(id: &str) -> AppEvent {
        AppEvent::ParticipantJoined {
            channel_id: "voice-1".into(),
            participant: Participant::new(id, id.to_uppercase()),
        }
    }

    #[test]
    fn join_update_leave() {
        let roster = roster();
        assert!(roster.apply(&joined("bob")));
        assert!(roster.apply(&AppEvent::ParticipantUpdated {
            channel_id: "voice-1".into(),
            participant_id: "bob".into(),
            change: ParticipantField::Role(Role::Owner),
        }));
        assert_eq!(roster.get("bob").unwrap().role, Role::Owner);

        let ids: Vec<_> = roster.participants().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["me", "bob"]);

        assert!(roster.apply(&AppEvent::ParticipantLeft {
            channel_id: "voice-1".into(),
            participant_id: "bob".into(),
        }));
        assert!(roster.get("bob").is_none());
    }

    #[test]
    fn other_channels_and_local_targets_are_ignored() {
        let roster = roster();
        assert!(!roster.apply(&AppEvent::ParticipantJoined {
            channel_id: "voice-2".into(),
            participant: Participant::new("eve", "Eve"),
        }));
        assert!(!roster.apply(&AppEvent::ParticipantUpdated {
            channel_id: "voice-1".into(),
            participant_id: "me".into(),
            change: ParticipantField::Muted(true),
        }));
        assert!(!roster.local().unwrap().muted);
        assert!(!roster.apply(&AppEvent::ParticipantLeft {
            channel_id: "voice-1".into(),
            participant_id: "me".into(),
        }));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn call_lifecycle_replaces_remote_roster() {
        let roster = roster();
        roster.apply(&joined("stale"));
        roster.apply(&AppEvent::CallStarted {
            channel_id: "voice-1".into(),
            call_type: "video".into(),
            participants: vec![Participant::new("me", "Me"), Participant::new("ann", "Ann")],
        });
        let ids: Vec<_> = roster.participants().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["me", "ann"]);

        roster.apply(&AppEvent::CallEnded { channel_id: "voice-1".into() });
        assert_eq!(roster.len(), 1);
        assert!(roster.local().is_some());
    }

    #[tokio::test]
    async fn subscription_pumps_feed_events() {
        let roster = roster();
        let (tx, _rx) = crate::events::create_event_bus();
        let sub = roster.subscribe(tx.subscribe());

        tx.send(joined("zoe")).unwrap();
        for _ in 0..50 {
            if roster.get("zoe").is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(roster.get("zoe").is_some());

        drop(sub);
        tokio::task::yield_now().await;
        tx.send(joined("late")).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(roster.get("late").is_none());
    }
}
