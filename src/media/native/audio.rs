use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::MediaError;
use crate::media::backend::{audio_tap_channel, TrackControl, TrackKind};
use crate::media::processing::CaptureProcessor;
use crate::media::CaptureConstraints;
use crate::models::{DeviceDescriptor, DeviceKind};

use super::NativeTrack;

const FRAME_SAMPLES: usize = 960;

/// List input and output devices. cpal exposes names only, so the name is the id.
pub fn list_devices() -> Result<Vec<DeviceDescriptor>, MediaError> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let inputs = host
        .input_devices()
        .map_err(|e| MediaError::EnumerationFailed(e.to_string()))?;
    for device in inputs {
        if let Ok(name) = device.name() {
            devices.push(DeviceDescriptor {
                id: name.clone(),
                kind: DeviceKind::Input,
                label: name,
            });
        }
    }

    let outputs = host
        .output_devices()
        .map_err(|e| MediaError::EnumerationFailed(e.to_string()))?;
    for device in outputs {
        if let Ok(name) = device.name() {
            devices.push(DeviceDescriptor {
                id: name.clone(),
                kind: DeviceKind::Output,
                label: name,
            });
        }
    }

    Ok(devices)
}

fn find_input_device(host: &cpal::Host, id: Option<&str>) -> Result<cpal::Device, MediaError> {
    match id {
        None => host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceNotFound("No input device available".into())),
        Some(id) => host
            .input_devices()
            .map_err(|e| MediaError::AcquisitionFailed(e.to_string()))?
            .find(|d| d.name().map(|n| n == id).unwrap_or(false))
            .ok_or_else(|| MediaError::DeviceNotFound(id.to_string())),
    }
}

/// Start capturing from the selected (or default) input device.
///
/// The cpal stream is !Send, so it is built and kept on a dedicated thread;
/// this call blocks until the stream is running or has failed. Frames are
/// mono 48kHz, 960 samples (20ms), run through the noise gate and AGC the
/// constraints ask for. Disabled tracks publish silence.
pub fn start_capture(constraints: &CaptureConstraints) -> Result<NativeTrack, MediaError> {
    let control = Arc::new(TrackControl::new());
    let (tx, tap) = audio_tap_channel();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<String, MediaError>>();

    let device_id = constraints.input_device_id.clone();
    let mut processor = CaptureProcessor::new(constraints);
    let applied = processor.applied();
    if constraints.echo_cancellation {
        warn!("Echo cancellation requested but not available for local capture");
    }
    debug!("Capture processing: {:?}", applied);

    let thread_control = control.clone();
    std::thread::spawn(move || {
        let host = cpal::default_host();
        let device = match find_input_device(&host, device_id.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        info!("Using input device: {}", device_name);

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(48000),
            buffer_size: cpal::BufferSize::Default,
        };

        let callback_control = thread_control.clone();
        let error_control = thread_control.clone();
        let mut buffer = Vec::with_capacity(FRAME_SAMPLES);

        let stream = match device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !callback_control.is_live() {
                    return;
                }
                let enabled = callback_control.is_enabled();
                for &sample in data {
                    buffer.push(if enabled { sample } else { 0.0 });
                    if buffer.len() == FRAME_SAMPLES {
                        if enabled {
                            processor.process(&mut buffer);
                        }
                        tx.send_replace(Arc::from(buffer.as_slice()));
                        buffer.clear();
                    }
                }
            },
            move |err| {
                error!("Audio capture error: {}", err);
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    error_control.mark_ended();
                }
            },
            None,
        ) {
            Ok(s) => s,
            Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                let _ = ready_tx.send(Err(MediaError::DeviceNotFound(device_name)));
                return;
            }
            Err(e) => {
                let _ = ready_tx.send(Err(MediaError::AcquisitionFailed(format!(
                    "Failed to build input stream: {}",
                    e
                ))));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(MediaError::AcquisitionFailed(format!(
                "Failed to start capture: {}",
                e
            ))));
            return;
        }

        info!("Audio capture started (48kHz mono, 20ms frames)");
        let _ = ready_tx.send(Ok(device_name));

        // Keep the stream alive until stopped
        while thread_control.is_live() {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        drop(stream);
        info!("Audio capture thread exiting");
    });

    match ready_rx.recv() {
        Ok(Ok(label)) => {
            Ok(NativeTrack::new(TrackKind::Audio, label, control, Some(tap)).with_processing(applied))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(MediaError::AcquisitionFailed("Audio capture thread panicked".into())),
    }
}
