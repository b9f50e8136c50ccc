use serde::{Deserialize, Serialize};

// ============================================================
// Identity
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
}

// ============================================================
// Settings
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

// ============================================================
// Devices
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub kind: DeviceKind,
    /// Empty until capture permission has been granted at least once.
    pub label: String,
}

impl DeviceDescriptor {
    /// Label for display; `position` is the zero-based index within its kind.
    pub fn display_label(&self, position: usize) -> String {
        if self.label.trim().is_empty() {
            format!("unnamed device {}", position + 1)
        } else {
            self.label.clone()
        }
    }
}

// ============================================================
// Roster
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub deafened: bool,
    #[serde(default)]
    pub video_enabled: bool,
    #[serde(default)]
    pub screen_sharing: bool,
    #[serde(default)]
    pub speaking: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
            role: Role::Member,
            muted: false,
            deafened: false,
            video_enabled: false,
            screen_sharing: false,
            speaking: false,
        }
    }

    pub fn apply(&mut self, field: &ParticipantField) {
        match field {
            ParticipantField::Muted(v) => self.muted = *v,
            ParticipantField::Deafened(v) => self.deafened = *v,
            ParticipantField::VideoEnabled(v) => self.video_enabled = *v,
            ParticipantField::ScreenSharing(v) => self.screen_sharing = *v,
            ParticipantField::Speaking(v) => self.speaking = *v,
            ParticipantField::Role(role) => self.role = *role,
            ParticipantField::DisplayName(name) => self.display_name = name.clone(),
            ParticipantField::AvatarRef(avatar) => self.avatar_ref = avatar.clone(),
        }
    }
}

/// A single `{field, value}` change from the roster feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ParticipantField {
    Muted(bool),
    Deafened(bool),
    VideoEnabled(bool),
    ScreenSharing(bool),
    Speaking(bool),
    Role(Role),
    DisplayName(String),
    AvatarRef(Option<String>),
}
