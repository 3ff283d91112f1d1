// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Virtual device output defaults
pub mod output {
    /// Default virtual camera resolution
    pub const DEFAULT_WIDTH: u32 = 1280;
    pub const DEFAULT_HEIGHT: u32 = 720;

    /// Default virtual camera framerate
    pub const DEFAULT_FPS: u32 = 30;

    /// Default virtual microphone sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default virtual microphone channel count (interleaved stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Samples per channel in one audio block (~10ms at 48kHz)
    pub const DEFAULT_BLOCK_FRAMES: u32 = 480;

    /// Output pixel format pushed to the virtual camera
    /// RGBA uses 4 bytes/pixel; videoconvert in the sink pipeline handles negotiation
    pub const PIXEL_FORMAT: &str = "RGBA";

    /// Output sample format pushed to the virtual microphone
    pub const SAMPLE_FORMAT: &str = "F32LE";
}

/// PipeWire node identity for the virtual devices
pub mod nodes {
    pub const CAMERA_NODE_NAME: &str = "streamforge-virtual-camera";
    pub const CAMERA_DESCRIPTION: &str = "StreamForge Camera (Virtual)";
    pub const MICROPHONE_NODE_NAME: &str = "streamforge-virtual-mic";
    pub const MICROPHONE_DESCRIPTION: &str = "StreamForge Microphone (Virtual)";
}

/// Pacing and synchronization defaults
///
/// These are tuning defaults, overridable through [`crate::config::SyncSettings`].
pub mod sync {
    use super::Duration;

    /// Audio units may be emitted this far ahead of the clock
    pub const AUDIO_DELIVER_WINDOW: Duration = Duration::from_millis(10);

    /// Video units later than this behind the clock are dropped
    pub const VIDEO_LAG_THRESHOLD: Duration = Duration::from_millis(100);

    /// Audio units later than this behind the clock are dropped
    ///
    /// Larger than the video threshold so video is always dropped first.
    pub const AUDIO_LAG_THRESHOLD: Duration = Duration::from_millis(250);

    /// Maximum tolerated audio/video emission drift
    pub const DRIFT_TOLERANCE: Duration = Duration::from_millis(40);

    /// Upper bound on a single hold before re-checking the clock
    pub const HOLD_RECHECK_INTERVAL: Duration = Duration::from_millis(5);
}

/// Worker and device timing constants
pub mod timing {
    use super::Duration;

    /// Bound on joining pacing loops when tearing down a source
    pub const TEARDOWN_TIMEOUT: Duration = Duration::from_millis(250);

    /// Decoder pull slice; reads return `Pending` after this so loops can observe stop requests
    pub const READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// Consecutive sink write failures before the session enters `Error`
    pub const SINK_MAX_FAILURES: u32 = 3;

    /// Delay before retrying a failed sink write on the next unit
    pub const SINK_RETRY_BACKOFF: Duration = Duration::from_millis(20);

    /// Emitted unit modulo for periodic logging
    pub const UNIT_LOG_INTERVAL: u64 = 300;

    /// Timeout waiting for a decoder pipeline to preroll
    pub const OPEN_TIMEOUT_SECS: u64 = 5;

    /// Pipeline state change timeout for virtual device sinks
    pub const SINK_START_TIMEOUT_SECS: u64 = 5;

    /// Status refresh interval for the console front-end
    pub const STATUS_REFRESH_INTERVAL: Duration = Duration::from_millis(250);
}

/// Virtual camera output device type
///
/// Determines which sink to use for virtual camera output:
/// - PipeWire: Modern Linux multimedia framework (default)
/// - V4L2Loopback: Traditional V4L2 loopback device (better app compatibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VirtualCameraOutput {
    /// PipeWire virtual camera (pipewiresink)
    #[default]
    PipeWire,
    /// V4L2 loopback device (v4l2sink)
    /// Works with applications that expect /dev/video* devices (e.g., Discord, Chrome)
    V4L2Loopback,
}

impl VirtualCameraOutput {
    /// Get all output variants for iteration
    pub const ALL: [VirtualCameraOutput; 2] = [
        VirtualCameraOutput::PipeWire,
        VirtualCameraOutput::V4L2Loopback,
    ];

    /// Get display name for the output type
    pub fn display_name(&self) -> &'static str {
        match self {
            VirtualCameraOutput::PipeWire => "PipeWire",
            VirtualCameraOutput::V4L2Loopback => "V4L2 Loopback",
        }
    }
}

impl std::str::FromStr for VirtualCameraOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pipewire" => Ok(VirtualCameraOutput::PipeWire),
            "v4l2loopback" | "v4l2" => Ok(VirtualCameraOutput::V4L2Loopback),
            other => Err(format!("unknown output '{}'", other)),
        }
    }
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_dropped_before_audio() {
        assert!(sync::VIDEO_LAG_THRESHOLD < sync::AUDIO_LAG_THRESHOLD);
    }

    #[test]
    fn test_output_from_str() {
        assert_eq!(
            "pipewire".parse::<VirtualCameraOutput>(),
            Ok(VirtualCameraOutput::PipeWire)
        );
        assert_eq!(
            "V4L2Loopback".parse::<VirtualCameraOutput>(),
            Ok(VirtualCameraOutput::V4L2Loopback)
        );
        assert!("hdmi".parse::<VirtualCameraOutput>().is_err());
    }
}
