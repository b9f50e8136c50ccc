use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::MediaError;

use super::backend::{AudioTap, SharedTrack, TrackKind};
use super::processing::rms_dbfs;

/// Speaking threshold on the 0–255 activity scale.
pub const SPEAKING_THRESHOLD: u8 = 30;

/// One display frame at 60Hz.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(16);

// Decibel window mapped onto 0–255.
const MIN_DECIBELS: f32 = -60.0;
const MAX_DECIBELS: f32 = 0.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    Speaking(bool),
    /// The analysed track ended underneath the monitor; sampling has stopped.
    SourceEnded { track_id: String },
}

/// Activity level of a PCM frame: RMS in dBFS scaled from [-60, 0] onto [0, 255].
pub fn activity_level(frame: &[f32]) -> u8 {
    let db = rms_dbfs(frame);
    let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0;
    scaled.clamp(0.0, 255.0) as u8
}

/// Amplitude pipeline over a borrowed audio track.
#[derive(Debug)]
pub struct AnalysisGraph {
    track: SharedTrack,
    tap: AudioTap,
}

impl AnalysisGraph {
    pub fn build(source: &SharedTrack) -> Result<Self, MediaError> {
        if source.kind() != TrackKind::Audio {
            return Err(MediaError::AcquisitionFailed(format!(
                "Track {} is not an audio track",
                source.id()
            )));
        }
        if !source.is_live() {
            return Err(MediaError::AcquisitionFailed(format!(
                "Audio track {} ended before analysis started",
                source.id()
            )));
        }
        let tap = source.audio_tap().ok_or_else(|| {
            MediaError::AcquisitionFailed(format!("Audio track {} has no PCM feed", source.id()))
        })?;
        Ok(Self {
            track: source.clone(),
            tap,
        })
    }

    pub fn track_id(&self) -> &str {
        self.track.id()
    }

    /// `None` once the source is gone.
    fn read_level(&mut self) -> Option<u8> {
        if !self.track.is_live() || self.tap.has_changed().is_err() {
            return None;
        }
        if !self.track.is_enabled() {
            return Some(0);
        }
        let frame = self.tap.borrow_and_update().clone();
        Some(activity_level(&frame))
    }
}

#[derive(Default)]
struct MonitorInner {
    graph: Option<AnalysisGraph>,
    task: Option<JoinHandle<()>>,
    speaking: bool,
}

struct MonitorShared {
    threshold: u8,
    interval: Duration,
    events: mpsc::UnboundedSender<ActivityEvent>,
    inner: Mutex<MonitorInner>,
}

impl Drop for MonitorShared {
    fn drop(&mut self) {
        if let Some(task) = self.inner.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Derives a speaking flag from the local audio track on a per-frame cadence.
///
/// Owns the analysis graph but never the track: `stop` leaves the track running.
/// Edges are reported as [`ActivityEvent`]s on the channel given at construction.
#[derive(Clone)]
pub struct AudioActivityMonitor {
    shared: Arc<MonitorShared>,
}

impl AudioActivityMonitor {
    pub fn new(events: mpsc::UnboundedSender<ActivityEvent>) -> Self {
        Self::with_settings(SPEAKING_THRESHOLD, SAMPLE_INTERVAL, events)
    }

    pub fn with_settings(
        threshold: u8,
        interval: Duration,
        events: mpsc::UnboundedSender<ActivityEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                threshold,
                interval,
                events,
                inner: Mutex::new(MonitorInner::default()),
            }),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.shared.threshold
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().graph.is_some()
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.inner.lock().speaking
    }

    /// Build a graph over `source` and begin sampling. Starting again on the
    /// same track is a no-op; a different track replaces the current graph.
    pub fn start(&self, source: &SharedTrack) -> Result<(), MediaError> {
        let mut inner = self.shared.inner.lock();
        if inner
            .graph
            .as_ref()
            .is_some_and(|graph| graph.track_id() == source.id())
        {
            return Ok(());
        }

        let graph = AnalysisGraph::build(source)?;
        self.stop_locked(&mut inner);
        inner.graph = Some(graph);

        let weak: Weak<MonitorShared> = Arc::downgrade(&self.shared);
        let interval = self.shared.interval;
        inner.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if (AudioActivityMonitor { shared }).sample().is_none() {
                    break;
                }
            }
        }));

        debug!("Activity monitor started on track {}", source.id());
        Ok(())
    }

    /// Take one reading. Returns the current speaking flag, or `None` when not
    /// running. If the source has ended the monitor stops itself.
    pub fn sample(&self) -> Option<bool> {
        let mut inner = self.shared.inner.lock();
        let level = inner.graph.as_mut()?.read_level();

        match level {
            Some(level) => {
                let speaking = level > self.shared.threshold;
                if speaking != inner.speaking {
                    inner.speaking = speaking;
                    let _ = self.shared.events.send(ActivityEvent::Speaking(speaking));
                }
                Some(speaking)
            }
            None => {
                let track_id = inner
                    .graph
                    .as_ref()
                    .map(|graph| graph.track_id().to_string())
                    .unwrap_or_default();
                info!("Audio track {} ended, stopping activity monitor", track_id);
                self.stop_locked(&mut inner);
                let _ = self.shared.events.send(ActivityEvent::SourceEnded { track_id });
                None
            }
        }
    }

    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        self.stop_locked(&mut inner);
    }

    fn stop_locked(&self, inner: &mut MonitorInner) {
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        if inner.graph.take().is_some() {
            debug!("Activity monitor stopped");
        }
        if inner.speaking {
            inner.speaking = false;
            let _ = self.shared.events.send(ActivityEvent::Speaking(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::backend::MediaTrack;
    use crate::media::virtual_backend::VirtualTrack;

    fn monitor() -> (AudioActivityMonitor, mpsc::UnboundedReceiver<ActivityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Long interval keeps the background loop out of the way of manual sampling.
        (AudioActivityMonitor::with_settings(SPEAKING_THRESHOLD, Duration::from_secs(3600), tx), rx)
    }

    #[test]
    fn level_scale() {
        assert_eq!(activity_level(&[]), 0);
        assert_eq!(activity_level(&[0.0; 960]), 0);
        assert!(activity_level(&[0.0005; 960]) < SPEAKING_THRESHOLD);
        assert!(activity_level(&[0.5; 960]) > 200);
        assert_eq!(activity_level(&[1.0; 960]), 255);
    }

    #[tokio::test]
    async fn reports_rising_and_falling_edges() {
        let (monitor, mut rx) = monitor();
        let track = VirtualTrack::audio("mic");
        let shared: SharedTrack = track.clone();

        monitor.start(&shared).unwrap();
        assert!(monitor.is_running());

        track.feed(&[0.3; 960]);
        assert_eq!(monitor.sample(), Some(true));
        assert_eq!(rx.try_recv().unwrap(), ActivityEvent::Speaking(true));

        // Same level again: no new edge.
        assert_eq!(monitor.sample(), Some(true));
        assert!(rx.try_recv().is_err());

        track.feed(&[0.0; 960]);
        assert_eq!(monitor.sample(), Some(false));
        assert_eq!(rx.try_recv().unwrap(), ActivityEvent::Speaking(false));
    }

    #[tokio::test]
    async fn disabled_track_is_silent() {
        let (monitor, _rx) = monitor();
        let track = VirtualTrack::audio("mic");
        let shared: SharedTrack = track.clone();
        monitor.start(&shared).unwrap();

        track.feed(&[0.8; 960]);
        track.set_enabled(false);
        assert_eq!(monitor.sample(), Some(false));
    }

    #[tokio::test]
    async fn ended_source_stops_monitor_without_stopping_track() {
        let (monitor, mut rx) = monitor();
        let track = VirtualTrack::audio("mic");
        let shared: SharedTrack = track.clone();
        monitor.start(&shared).unwrap();

        track.feed(&[0.3; 960]);
        monitor.sample();
        let _ = rx.try_recv();

        track.end();
        assert_eq!(monitor.sample(), None);
        assert!(!monitor.is_running());
        assert!(!monitor.is_speaking());
        assert_eq!(rx.try_recv().unwrap(), ActivityEvent::Speaking(false));
        assert_eq!(
            rx.try_recv().unwrap(),
            ActivityEvent::SourceEnded { track_id: track.id().to_string() }
        );
        assert_eq!(track.stop_calls(), 0);

        // Sampling after the stop is inert.
        assert_eq!(monitor.sample(), None);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (monitor, _rx) = monitor();
        let track = VirtualTrack::audio("mic");
        let shared: SharedTrack = track.clone();

        monitor.start(&shared).unwrap();
        monitor.start(&shared).unwrap();
        assert!(monitor.is_running());

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(track.is_live());
    }

    #[tokio::test]
    async fn video_tracks_cannot_be_analysed() {
        let (monitor, _rx) = monitor();
        let camera: SharedTrack = VirtualTrack::video("cam");
        assert!(matches!(monitor.start(&camera), Err(MediaError::AcquisitionFailed(_))));
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn background_loop_samples_on_its_own() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = AudioActivityMonitor::with_settings(SPEAKING_THRESHOLD, Duration::from_millis(5), tx);
        let track = VirtualTrack::audio("mic");
        let shared: SharedTrack = track.clone();
        monitor.start(&shared).unwrap();

        track.feed(&[0.4; 960]);
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor loop never sampled");
        assert_eq!(event, Some(ActivityEvent::Speaking(true)));
        monitor.stop();
    }
}
