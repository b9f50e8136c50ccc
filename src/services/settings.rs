use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::media::{clamp_volume, CaptureConstraints, VolumeDirection};
use crate::models::{DeviceKind, Setting};
use crate::state::ServiceContext;

pub const ECHO_CANCELLATION: &str = "echoCancellation";
pub const NOISE_SUPPRESSION: &str = "noiseSuppression";
pub const AUTO_GAIN_CONTROL: &str = "autoGainControl";
pub const INPUT_VOLUME: &str = "inputVolume";
pub const OUTPUT_VOLUME: &str = "outputVolume";
pub const SELECTED_INPUT_DEVICE: &str = "selectedInputDeviceId";
pub const SELECTED_OUTPUT_DEVICE: &str = "selectedOutputDeviceId";

pub fn get_setting(ctx: &ServiceContext, key: &str) -> Result<Option<String>, String> {
    ctx.db.get_setting(key).map_err(|e| e.to_string())
}

pub fn set_setting(ctx: &ServiceContext, key: &str, value: &str) -> Result<(), String> {
    ctx.db.set_setting(key, value).map_err(|e| e.to_string())
}

pub fn get_all_settings(ctx: &ServiceContext) -> Result<Vec<Setting>, String> {
    ctx.db
        .get_all_settings()
        .map_err(|e| e.to_string())
        .map(|pairs| pairs.into_iter().map(|(k, v)| Setting { key: k, value: v }).collect())
}

pub fn delete_setting(ctx: &ServiceContext, key: &str) -> Result<(), String> {
    ctx.db.delete_setting(key).map_err(|e| e.to_string())
}

/// Voice preferences, read once when joining a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub input_volume: u8,
    pub output_volume: u8,
    pub input_device_id: Option<String>,
    pub output_device_id: Option<String>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            input_volume: 100,
            output_volume: 100,
            input_device_id: None,
            output_device_id: None,
        }
    }
}

impl VoiceSettings {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
            input_device_id: self.input_device_id.clone(),
            output_device_id: self.output_device_id.clone(),
        }
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> bool {
    match raw.as_deref() {
        None => default,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            warn!("Ignoring unparsable {} value {:?}", key, other);
            default
        }
    }
}

fn parse_volume(key: &str, raw: Option<String>) -> u8 {
    let Some(raw) = raw else {
        return 100;
    };
    match raw.trim().parse::<i32>() {
        Ok(v) => clamp_volume(v),
        Err(_) => {
            warn!("Ignoring unparsable {} value {:?}", key, raw);
            100
        }
    }
}

fn parse_device(raw: Option<String>) -> Option<String> {
    raw.filter(|id| !id.trim().is_empty())
}

pub fn load_voice_settings(ctx: &ServiceContext) -> Result<VoiceSettings, String> {
    let get = |key: &str| get_setting(ctx, key);
    Ok(VoiceSettings {
        echo_cancellation: parse_bool(ECHO_CANCELLATION, get(ECHO_CANCELLATION)?, true),
        noise_suppression: parse_bool(NOISE_SUPPRESSION, get(NOISE_SUPPRESSION)?, true),
        auto_gain_control: parse_bool(AUTO_GAIN_CONTROL, get(AUTO_GAIN_CONTROL)?, true),
        input_volume: parse_volume(INPUT_VOLUME, get(INPUT_VOLUME)?),
        output_volume: parse_volume(OUTPUT_VOLUME, get(OUTPUT_VOLUME)?),
        input_device_id: parse_device(get(SELECTED_INPUT_DEVICE)?),
        output_device_id: parse_device(get(SELECTED_OUTPUT_DEVICE)?),
    })
}

pub fn save_device(ctx: &ServiceContext, kind: DeviceKind, device_id: Option<&str>) -> Result<(), String> {
    let key = match kind {
        DeviceKind::Input => SELECTED_INPUT_DEVICE,
        DeviceKind::Output => SELECTED_OUTPUT_DEVICE,
    };
    match device_id {
        Some(id) => set_setting(ctx, key, id),
        None => delete_setting(ctx, key),
    }
}

pub fn save_volume(ctx: &ServiceContext, direction: VolumeDirection, volume: u8) -> Result<(), String> {
    let key = match direction {
        VolumeDirection::Input => INPUT_VOLUME,
        VolumeDirection::Output => OUTPUT_VOLUME,
    };
    set_setting(ctx, key, &volume.to_string())
}

pub fn save_processing(ctx: &ServiceContext, constraints: &CaptureConstraints) -> Result<(), String> {
    set_setting(ctx, ECHO_CANCELLATION, &constraints.echo_cancellation.to_string())?;
    set_setting(ctx, NOISE_SUPPRESSION, &constraints.noise_suppression.to_string())?;
    set_setting(ctx, AUTO_GAIN_CONTROL, &constraints.auto_gain_control.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::media::virtual_backend::VirtualBackend;
    use std::sync::Arc;

    fn ctx() -> ServiceContext {
        let (event_tx, _) = crate::events::create_event_bus();
        ServiceContext::new(
            Arc::new(Database::open_in_memory().unwrap()),
            "me".into(),
            Arc::new(VirtualBackend::with_default_devices()),
            event_tx,
        )
    }

    #[test]
    fn empty_store_yields_defaults() {
        let ctx = ctx();
        assert_eq!(load_voice_settings(&ctx).unwrap(), VoiceSettings::default());
    }

    #[test]
    fn stored_values_are_loaded_and_sanitized() {
        let ctx = ctx();
        set_setting(&ctx, ECHO_CANCELLATION, "false").unwrap();
        set_setting(&ctx, NOISE_SUPPRESSION, "maybe").unwrap();
        set_setting(&ctx, INPUT_VOLUME, "250").unwrap();
        set_setting(&ctx, OUTPUT_VOLUME, "loud").unwrap();
        set_setting(&ctx, SELECTED_INPUT_DEVICE, "virtual-mic-1").unwrap();
        set_setting(&ctx, SELECTED_OUTPUT_DEVICE, "").unwrap();

        let settings = load_voice_settings(&ctx).unwrap();
        assert!(!settings.echo_cancellation);
        assert!(settings.noise_suppression);
        assert_eq!(settings.input_volume, 100);
        assert_eq!(settings.output_volume, 100);
        assert_eq!(settings.input_device_id.as_deref(), Some("virtual-mic-1"));
        assert_eq!(settings.output_device_id, None);
        assert_eq!(settings.constraints().input_device_id.as_deref(), Some("virtual-mic-1"));
    }

    #[test]
    fn savers_write_the_voice_keys() {
        let ctx = ctx();
        save_volume(&ctx, VolumeDirection::Output, 35).unwrap();
        save_device(&ctx, DeviceKind::Input, Some("virtual-mic-0")).unwrap();
        save_processing(
            &ctx,
            &CaptureConstraints {
                auto_gain_control: false,
                ..CaptureConstraints::default()
            },
        )
        .unwrap();

        assert_eq!(get_setting(&ctx, OUTPUT_VOLUME).unwrap().as_deref(), Some("35"));
        assert_eq!(get_setting(&ctx, AUTO_GAIN_CONTROL).unwrap().as_deref(), Some("false"));

        save_device(&ctx, DeviceKind::Input, None).unwrap();
        assert_eq!(get_setting(&ctx, SELECTED_INPUT_DEVICE).unwrap(), None);
    }
}
