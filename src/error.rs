use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error category recorded in `MediaSessionState::last_error` and the device snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    AcquisitionFailed,
    EnumerationFailed,
}

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Capture failed: {0}")]
    AcquisitionFailed(String),
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),
    #[error("Not in a voice channel")]
    NotOpen,
    #[error("Voice session is closed")]
    Closed,
}

impl MediaError {
    /// The category stored for the view layer. Lifecycle misuse (`NotOpen`, `Closed`)
    /// is reported to the caller only and never recorded.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            MediaError::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
            MediaError::DeviceNotFound(_) => Some(ErrorKind::DeviceNotFound),
            MediaError::AcquisitionFailed(_) => Some(ErrorKind::AcquisitionFailed),
            MediaError::EnumerationFailed(_) => Some(ErrorKind::EnumerationFailed),
            MediaError::NotOpen | MediaError::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_have_no_kind() {
        assert_eq!(MediaError::NotOpen.kind(), None);
        assert_eq!(MediaError::Closed.kind(), None);
        assert_eq!(
            MediaError::DeviceNotFound("usb-mic".into()).kind(),
            Some(ErrorKind::DeviceNotFound)
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AcquisitionFailed).unwrap();
        assert_eq!(json, "\"acquisition_failed\"");
    }
}
