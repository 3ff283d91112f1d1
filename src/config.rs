// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration
//!
//! Persisted as JSON under the user's config directory. Missing fields fall
//! back to defaults so older files keep loading.

use crate::constants::{VirtualCameraOutput, output, sync, timing};
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{AudioFormat, PixelFormat, VideoFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "streamforge";
const CONFIG_FILE: &str = "config.json";

/// Audio output settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one emitted block
    pub block_frames: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: output::DEFAULT_SAMPLE_RATE,
            channels: output::DEFAULT_CHANNELS,
            block_frames: output::DEFAULT_BLOCK_FRAMES,
        }
    }
}

impl AudioSettings {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Pacing thresholds, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub audio_deliver_window_ms: u64,
    /// `None` means one frame interval at the output framerate
    pub video_deliver_window_ms: Option<u64>,
    pub video_lag_threshold_ms: u64,
    pub audio_lag_threshold_ms: u64,
    pub drift_tolerance_ms: u64,
    pub hold_recheck_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            audio_deliver_window_ms: sync::AUDIO_DELIVER_WINDOW.as_millis() as u64,
            video_deliver_window_ms: None,
            video_lag_threshold_ms: sync::VIDEO_LAG_THRESHOLD.as_millis() as u64,
            audio_lag_threshold_ms: sync::AUDIO_LAG_THRESHOLD.as_millis() as u64,
            drift_tolerance_ms: sync::DRIFT_TOLERANCE.as_millis() as u64,
            hold_recheck_ms: sync::HOLD_RECHECK_INTERVAL.as_millis() as u64,
        }
    }
}

impl SyncSettings {
    pub fn audio_deliver_window(&self) -> Duration {
        Duration::from_millis(self.audio_deliver_window_ms)
    }

    pub fn video_deliver_window(&self, video: &VideoFormat) -> Duration {
        self.video_deliver_window_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| video.frame_interval())
    }

    pub fn video_lag_threshold(&self) -> Duration {
        Duration::from_millis(self.video_lag_threshold_ms)
    }

    pub fn audio_lag_threshold(&self) -> Duration {
        Duration::from_millis(self.audio_lag_threshold_ms)
    }

    pub fn drift_tolerance(&self) -> Duration {
        Duration::from_millis(self.drift_tolerance_ms)
    }

    pub fn hold_recheck(&self) -> Duration {
        Duration::from_millis(self.hold_recheck_ms.max(1))
    }
}

/// Device sink retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Consecutive failed writes before the session enters `Error`
    pub max_failures: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            max_failures: timing::SINK_MAX_FAILURES,
            retry_backoff_ms: timing::SINK_RETRY_BACKOFF.as_millis() as u64,
        }
    }
}

impl SinkSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Playlist policies applied at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSettings {
    /// Wrap to the first entry after the last one
    pub looping: bool,
    /// Visit entries in a per-pass random permutation
    pub shuffle: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Virtual camera output format
    pub video: VideoFormat,
    /// Virtual microphone output format
    pub audio: AudioSettings,
    pub sync: SyncSettings,
    pub sink: SinkSettings,
    pub playlist: PlaylistSettings,
    /// Virtual camera backend
    pub output: VirtualCameraOutput,
    /// Explicit v4l2loopback node; auto-detected when unset
    pub v4l2loopback_device: Option<String>,
    /// Bound on joining pacing loops when a source is torn down
    pub teardown_timeout_ms: u64,
    /// Decoder pull slice
    pub read_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video: VideoFormat {
                width: output::DEFAULT_WIDTH,
                height: output::DEFAULT_HEIGHT,
                fps: output::DEFAULT_FPS,
                pixel_format: PixelFormat::Rgba,
            },
            audio: AudioSettings::default(),
            sync: SyncSettings::default(),
            sink: SinkSettings::default(),
            playlist: PlaylistSettings::default(),
            output: VirtualCameraOutput::default(),
            v4l2loopback_device: None,
            teardown_timeout_ms: timing::TEARDOWN_TIMEOUT.as_millis() as u64,
            read_timeout_ms: timing::READ_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/streamforge/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> PlaybackResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> PlaybackResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> PlaybackResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> PlaybackResult<()> {
        if self.video.width == 0 || self.video.height == 0 || self.video.fps == 0 {
            return Err(PlaybackError::Config(
                "video width, height and fps must be non-zero".into(),
            ));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 || self.audio.block_frames == 0
        {
            return Err(PlaybackError::Config(
                "audio sample rate, channels and block size must be non-zero".into(),
            ));
        }
        if self.sync.video_lag_threshold_ms >= self.sync.audio_lag_threshold_ms {
            return Err(PlaybackError::Config(
                "video lag threshold must be below the audio lag threshold".into(),
            ));
        }
        if self.sink.max_failures == 0 {
            return Err(PlaybackError::Config(
                "sink max_failures must be at least 1".into(),
            ));
        }
        // A pacing loop only sees the stop flag between reads
        if self.read_timeout_ms >= self.teardown_timeout_ms {
            return Err(PlaybackError::Config(format!(
                "read timeout ({} ms) must be below the teardown timeout ({} ms)",
                self.read_timeout_ms, self.teardown_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}
