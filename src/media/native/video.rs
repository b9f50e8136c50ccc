use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::MediaError;
use crate::media::backend::{TrackControl, TrackKind};

use super::NativeTrack;

/// Open a camera (index 0 by default) on its own thread.
///
/// Frames are pulled for as long as the track is live so the device stays
/// warm; a read error after start counts as the source ending.
pub fn start_camera(device_index: Option<u32>) -> Result<NativeTrack, MediaError> {
    let control = Arc::new(TrackControl::new());
    let thread_control = control.clone();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<String, MediaError>>();

    std::thread::spawn(move || {
        let index = CameraIndex::Index(device_index.unwrap_or(0));
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 15),
        ));

        let mut camera = match Camera::new(index, requested) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err(MediaError::AcquisitionFailed(format!("Failed to open camera: {}", e))));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            let _ = ready_tx.send(Err(MediaError::AcquisitionFailed(format!(
                "Failed to open camera stream: {}",
                e
            ))));
            return;
        }

        let name = camera.info().human_name();
        info!("Camera started: {} (640x480)", name);
        let _ = ready_tx.send(Ok(name));

        while thread_control.is_live() {
            if !thread_control.is_enabled() {
                std::thread::sleep(std::time::Duration::from_millis(66));
                continue;
            }
            if let Err(e) = camera.frame() {
                if thread_control.is_live() {
                    error!("Camera frame error: {}", e);
                    thread_control.mark_ended();
                }
                break;
            }
        }

        let _ = camera.stop_stream();
        info!("Camera thread exiting");
    });

    match ready_rx.recv() {
        Ok(Ok(label)) => Ok(NativeTrack::new(TrackKind::Video, label, control, None)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(MediaError::AcquisitionFailed("Camera thread panicked".into())),
    }
}
