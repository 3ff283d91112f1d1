// SPDX-License-Identifier: GPL-3.0-only

//! Host device discovery
//!
//! Availability checks for the virtual device backends and validation of
//! live camera entries. Everything here degrades gracefully inside sandboxes
//! where `/proc` or `/sys` are hidden.

use crate::constants::VirtualCameraOutput;
use crate::errors::{PlaybackError, PlaybackResult};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use v4l::capability::Flags;

/// A `/dev/video*` node and what it reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoDevice {
    pub path: PathBuf,
    pub name: String,
    pub loopback: bool,
}

/// Whether the GStreamer PipeWire sink plugin is installed
pub fn pipewire_available() -> bool {
    if gstreamer::init().is_err() {
        return false;
    }
    gstreamer::ElementFactory::find("pipewiresink").is_some()
}

pub fn output_available(output: VirtualCameraOutput) -> bool {
    match output {
        VirtualCameraOutput::PipeWire => pipewire_available(),
        VirtualCameraOutput::V4L2Loopback => find_v4l2loopback_device().is_some(),
    }
}

pub fn unavailable_reason(output: VirtualCameraOutput) -> Option<&'static str> {
    if output_available(output) {
        return None;
    }
    match output {
        VirtualCameraOutput::PipeWire => Some("GStreamer pipewiresink plugin not found"),
        VirtualCameraOutput::V4L2Loopback => Some("no v4l2loopback device found"),
    }
}

/// List `/dev/video*` nodes, sorted by path
pub fn video_devices() -> Vec<VideoDevice> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };

    let mut devices: Vec<VideoDevice> = entries
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let number = file_name.to_string_lossy().strip_prefix("video")?.to_string();
            let name = fs::read_to_string(format!("/sys/class/video4linux/video{}/name", number))
                .map(|n| n.trim().to_string())
                .unwrap_or_default();
            Some(VideoDevice {
                path: entry.path(),
                loopback: is_loopback_name(&name),
                name,
            })
        })
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

/// v4l2loopback default names, custom loopback labels and OBS's virtual camera
fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    name.contains("Dummy video device")
        || lower.contains("loopback")
        || lower.contains("virtual")
        || name.contains("OBS")
}

/// First v4l2loopback device, if the module is loaded
pub fn find_v4l2loopback_device() -> Option<String> {
    let modules_path = Path::new("/proc/modules");
    let module_loaded = match fs::read_to_string(modules_path) {
        Ok(content) => content.contains("v4l2loopback"),
        // Hidden /proc (e.g. Flatpak): fall through to the device scan
        Err(_) => true,
    };
    if !module_loaded {
        debug!("v4l2loopback module not loaded");
        return None;
    }

    video_devices()
        .into_iter()
        .find(|device| device.loopback)
        .map(|device| device.path.to_string_lossy().to_string())
}

/// Check that `path` is a camera that can capture video
///
/// Busy or inaccessible devices report `DecodeError`, matching how a file
/// that cannot be decoded is reported.
pub fn validate_camera(path: &Path) -> PlaybackResult<String> {
    let device = v4l::Device::with_path(path).map_err(|e| {
        PlaybackError::DecodeError(format!("cannot open {}: {}", path.display(), e))
    })?;
    let caps = device.query_caps().map_err(|e| {
        PlaybackError::DecodeError(format!("cannot query {}: {}", path.display(), e))
    })?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(PlaybackError::UnsupportedFormat(format!(
            "{} ({}) cannot capture video",
            path.display(),
            caps.card
        )));
    }
    debug!(path = %path.display(), card = %caps.card, driver = %caps.driver, "Camera validated");
    Ok(caps.card)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_names() {
        assert!(is_loopback_name("Dummy video device (0x0000)"));
        assert!(is_loopback_name("StreamForge Loopback"));
        assert!(is_loopback_name("OBS Virtual Camera"));
        assert!(!is_loopback_name("Integrated Camera: Integrated C"));
    }

    #[test]
    fn test_validate_missing_camera_is_decode_error() {
        let err = validate_camera(Path::new("/dev/video-streamforge-missing")).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::DecodeError);
    }
}
