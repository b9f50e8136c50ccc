use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::MediaError;
use crate::media::backend::{TrackControl, TrackKind};

use super::NativeTrack;

fn check_ffmpeg_candidates(candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|candidate| {
            Command::new(candidate.as_str())
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok()
        })
        .cloned()
}

fn find_ffmpeg() -> Option<String> {
    let mut candidates = vec!["ffmpeg".to_string()];
    if cfg!(target_os = "linux") {
        candidates.extend(["/usr/bin/ffmpeg".into(), "/usr/local/bin/ffmpeg".into()]);
    } else if cfg!(target_os = "macos") {
        candidates.extend(["/opt/homebrew/bin/ffmpeg".into(), "/usr/local/bin/ffmpeg".into()]);
    } else if cfg!(target_os = "windows") {
        candidates.extend([
            r"C:\ffmpeg\bin\ffmpeg.exe".into(),
            r"C:\Program Files\ffmpeg\bin\ffmpeg.exe".into(),
        ]);
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            candidates.push(format!(r"{}\Microsoft\WinGet\Links\ffmpeg.exe", local_app_data));
        }
    }

    let found = check_ffmpeg_candidates(&candidates);
    if let Some(path) = &found {
        info!("Found ffmpeg at: {}", path);
    }
    found
}

/// Ask the user to confirm sharing the screen. `false` means cancelled.
#[cfg(target_os = "linux")]
fn confirm_share() -> bool {
    match Command::new("zenity")
        .args(["--question", "--title=Share Screen", "--text=Share your entire screen?"])
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(_) => {
            warn!("zenity not found, sharing without a picker");
            true
        }
    }
}

#[cfg(target_os = "macos")]
fn confirm_share() -> bool {
    match Command::new("osascript")
        .args([
            "-e",
            "display dialog \"Share your entire screen?\" buttons {\"Cancel\", \"Share\"} default button \"Share\"",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(_) => true,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn confirm_share() -> bool {
    true
}

#[cfg(target_os = "linux")]
fn screen_resolution() -> Option<(u32, u32)> {
    let output = Command::new("xdpyinfo").stderr(Stdio::null()).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let dims = text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("dimensions:"))?
        .split_whitespace()
        .nth(1)?;
    let (w, h) = dims.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(target_os = "linux")]
fn input_args(cmd: &mut Command) {
    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
    let (w, h) = screen_resolution().unwrap_or((1920, 1080));
    let video_size = format!("{}x{}", w, h);
    info!("Capturing full screen: {} on {}", video_size, display);
    cmd.args(["-f", "x11grab", "-framerate", "10", "-video_size", &video_size, "-i", &display]);
}

#[cfg(target_os = "windows")]
fn input_args(cmd: &mut Command) {
    info!("Capturing full screen via gdigrab");
    cmd.args(["-f", "gdigrab", "-framerate", "10", "-i", "desktop"]);
}

#[cfg(target_os = "macos")]
fn input_args(cmd: &mut Command) {
    info!("Capturing full screen via avfoundation");
    cmd.args(["-f", "avfoundation", "-framerate", "10", "-capture_cursor", "1", "-i", "Capture screen 0:"]);
}

/// Start an ffmpeg grabber for the whole screen.
///
/// The child process is the capture; it is killed when the track stops, and
/// its exit while the track is live is reported as the source ending.
pub fn start_screen_capture() -> Result<NativeTrack, MediaError> {
    let ffmpeg = find_ffmpeg().ok_or_else(|| {
        MediaError::AcquisitionFailed("No screen capture method available. Install ffmpeg for screen sharing.".into())
    })?;

    if !confirm_share() {
        info!("User cancelled screen share");
        return Err(MediaError::AcquisitionFailed("Screen share cancelled by user".into()));
    }

    let mut cmd = Command::new(&ffmpeg);
    input_args(&mut cmd);
    cmd.args(["-f", "null", "-"]);
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| MediaError::AcquisitionFailed(format!("Failed to start ffmpeg: {}", e)))?;

    let control = Arc::new(TrackControl::new());
    let thread_control = control.clone();
    std::thread::spawn(move || {
        while thread_control.is_live() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!("ffmpeg exited during screen share: {}", status);
                    thread_control.mark_ended();
                    return;
                }
                Ok(None) => std::thread::sleep(std::time::Duration::from_millis(100)),
                Err(e) => {
                    warn!("Lost track of ffmpeg: {}", e);
                    thread_control.mark_ended();
                    break;
                }
            }
        }
        let _ = child.kill();
        let _ = child.wait();
        info!("Screen capture stopped");
    });

    Ok(NativeTrack::new(TrackKind::Screen, "Entire Screen".into(), control, None))
}
