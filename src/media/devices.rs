use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, MediaError};
use crate::events::{AppEvent, EventSender};
use crate::models::{DeviceDescriptor, DeviceKind};

use super::backend::CaptureBackend;

/// A device as presented to the settings screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub label: String,
    /// True when the platform did not provide a label (no permission yet).
    pub unnamed: bool,
}

/// Device list partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub inputs: Vec<DeviceEntry>,
    pub outputs: Vec<DeviceEntry>,
    /// Set when the most recent refresh failed; the lists are from the last success.
    pub last_error: Option<ErrorKind>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    fn build(devices: &[DeviceDescriptor], last_error: Option<ErrorKind>, refreshed_at: Option<DateTime<Utc>>) -> Self {
        let entries = |kind: DeviceKind| -> Vec<DeviceEntry> {
            devices
                .iter()
                .filter(|d| d.kind == kind)
                .enumerate()
                .map(|(position, d)| DeviceEntry {
                    id: d.id.clone(),
                    label: d.display_label(position),
                    unnamed: d.label.trim().is_empty(),
                })
                .collect()
        };
        Self {
            inputs: entries(DeviceKind::Input),
            outputs: entries(DeviceKind::Output),
            last_error,
            refreshed_at,
        }
    }

    pub fn entries(&self, kind: DeviceKind) -> &[DeviceEntry] {
        match kind {
            DeviceKind::Input => &self.inputs,
            DeviceKind::Output => &self.outputs,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    devices: Vec<DeviceDescriptor>,
    last_error: Option<ErrorKind>,
    refreshed_at: Option<DateTime<Utc>>,
    issued: u64,
    applied: u64,
}

/// Cached view of the platform's audio devices.
pub struct DeviceRegistry {
    backend: Arc<dyn CaptureBackend>,
    event_tx: Option<EventSender>,
    inner: Mutex<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn CaptureBackend>, event_tx: Option<EventSender>) -> Self {
        Self {
            backend,
            event_tx,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Query the platform and replace the cache. When refreshes overlap, the
    /// most recently issued one decides the cache. On failure the previous
    /// list is kept and `last_error` is set.
    pub async fn refresh(&self) -> Result<DeviceSnapshot, MediaError> {
        let ticket = {
            let mut inner = self.inner.lock();
            inner.issued += 1;
            inner.issued
        };

        let result = self.backend.enumerate_devices().await;

        let snapshot = {
            let mut inner = self.inner.lock();
            if ticket < inner.applied {
                debug!("Discarding stale device listing #{}", ticket);
                return match result {
                    Ok(_) => Ok(Self::snapshot_locked(&inner)),
                    Err(e) => Err(e),
                };
            }
            inner.applied = ticket;

            match result {
                Ok(devices) => {
                    info!("Found {} audio devices", devices.len());
                    inner.devices = devices;
                    inner.last_error = None;
                    inner.refreshed_at = Some(Utc::now());
                    Self::snapshot_locked(&inner)
                }
                Err(e) => {
                    warn!("Failed to enumerate devices: {}", e);
                    inner.last_error = Some(ErrorKind::EnumerationFailed);
                    return Err(MediaError::EnumerationFailed(e.to_string()));
                }
            }
        };

        if let Some(tx) = &self.event_tx {
            let _ = tx.send(AppEvent::DevicesChanged(snapshot.clone()));
        }
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        Self::snapshot_locked(&self.inner.lock())
    }

    fn snapshot_locked(inner: &RegistryInner) -> DeviceSnapshot {
        DeviceSnapshot::build(&inner.devices, inner.last_error, inner.refreshed_at)
    }

    /// True before the first successful listing or while any label is blank,
    /// i.e. a refresh after a permission grant would reveal more.
    pub fn needs_labels(&self) -> bool {
        let inner = self.inner.lock();
        inner.refreshed_at.is_none() || inner.devices.iter().any(|d| d.label.trim().is_empty())
    }

    /// Whether `id` is a known device of `kind`. `None` when nothing of that
    /// kind has been listed, so callers cannot validate.
    pub fn contains(&self, kind: DeviceKind, id: &str) -> Option<bool> {
        let inner = self.inner.lock();
        let mut of_kind = inner.devices.iter().filter(|d| d.kind == kind).peekable();
        of_kind.peek()?;
        Some(of_kind.any(|d| d.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::virtual_backend::VirtualBackend;
    use crate::media::CaptureConstraints;

    fn registry(backend: &VirtualBackend) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(backend.clone()), None)
    }

    #[tokio::test]
    async fn refresh_before_permission_returns_unnamed_devices() {
        let backend = VirtualBackend::with_default_devices();
        let registry = registry(&backend);
        assert!(registry.needs_labels());

        let snapshot = registry.refresh().await.expect("refresh must not fail without labels");
        assert_eq!(snapshot.inputs.len(), 2);
        assert_eq!(snapshot.outputs.len(), 2);
        assert!(snapshot.inputs.iter().all(|d| d.unnamed));
        assert_eq!(snapshot.inputs[0].label, "unnamed device 1");
        assert_eq!(snapshot.inputs[1].label, "unnamed device 2");
        assert_eq!(snapshot.outputs[0].label, "unnamed device 1");
        assert!(registry.needs_labels());

        backend.grant_permission();
        let snapshot = registry.refresh().await.unwrap();
        assert_eq!(snapshot.inputs[0].label, "Built-in Microphone");
        assert!(!snapshot.inputs[0].unnamed);
        assert!(!registry.needs_labels());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let backend = VirtualBackend::with_default_devices();
        backend.grant_permission();
        let registry = registry(&backend);
        registry.refresh().await.unwrap();

        backend.fail_next_enumeration();
        let err = registry.refresh().await.unwrap_err();
        assert!(matches!(err, MediaError::EnumerationFailed(_)));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.inputs.len(), 2);
        assert_eq!(snapshot.last_error, Some(ErrorKind::EnumerationFailed));

        // A later success clears the marker.
        let snapshot = registry.refresh().await.unwrap();
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test]
    async fn refresh_is_repeatable_and_tracks_changes() {
        let backend = VirtualBackend::with_default_devices();
        let registry = registry(&backend);
        let first = registry.refresh().await.unwrap();
        let second = registry.refresh().await.unwrap();
        assert_eq!(first.inputs, second.inputs);

        backend.remove_device("virtual-mic-1");
        let third = registry.refresh().await.unwrap();
        assert_eq!(third.inputs.len(), 1);
    }

    #[tokio::test]
    async fn contains_is_unknown_until_listed() {
        let backend = VirtualBackend::with_default_devices();
        let registry = registry(&backend);
        assert_eq!(registry.contains(DeviceKind::Output, "virtual-out-0"), None);

        registry.refresh().await.unwrap();
        assert_eq!(registry.contains(DeviceKind::Output, "virtual-out-0"), Some(true));
        assert_eq!(registry.contains(DeviceKind::Output, "virtual-mic-0"), Some(false));
    }

    #[tokio::test]
    async fn refresh_publishes_devices_changed() {
        let backend = VirtualBackend::with_default_devices();
        let (tx, mut rx) = crate::events::create_event_bus();
        let registry = DeviceRegistry::new(Arc::new(backend.clone()), Some(tx));
        backend.acquire_audio(&CaptureConstraints::default()).await.unwrap();

        registry.refresh().await.unwrap();
        match rx.recv().await.unwrap() {
            AppEvent::DevicesChanged(snapshot) => assert_eq!(snapshot.inputs.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
