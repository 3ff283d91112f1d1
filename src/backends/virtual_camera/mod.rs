// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera backend for publishing paced frames
//!
//! This module creates a virtual camera device that other applications (like
//! video conferencing software) can use as a camera source.
//!
//! # Architecture
//!
//! ```text
//! Video pacing loop (RGBA frames)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ VirtualCameraSink│  ← DeviceSink<Frame>, pipeline created on first write
//! └──────────────────┘
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ GStreamer Sink   │  ← appsrc → videoconvert → pipewiresink | v4l2sink
//! └──────────────────┘
//!        │
//!        ▼
//!   Video Apps (Zoom, Teams, etc.)
//! ```

mod pipeline;

pub use pipeline::VirtualCameraPipeline;

use crate::backends::sink::DeviceSink;
use crate::config::Config;
use crate::constants::VirtualCameraOutput;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{Frame, VideoFormat};
use tracing::{debug, info, warn};

/// Virtual camera device sink
///
/// The pipeline is started lazily by the first write and rebuilt on the next
/// write after a failure, so a device that comes back is picked up again.
pub struct VirtualCameraSink {
    format: VideoFormat,
    output: VirtualCameraOutput,
    device: Option<String>,
    pipeline: Option<VirtualCameraPipeline>,
}

impl VirtualCameraSink {
    pub fn new(config: &Config) -> Self {
        Self {
            format: config.video,
            output: config.output,
            device: config.v4l2loopback_device.clone(),
            pipeline: None,
        }
    }

    /// Check if the output pipeline is currently up
    pub fn is_streaming(&self) -> bool {
        self.pipeline.is_some()
    }

    fn ensure_started(&mut self) -> PlaybackResult<&VirtualCameraPipeline> {
        if self.pipeline.is_none() {
            info!(
                width = self.format.width,
                height = self.format.height,
                output = self.output.display_name(),
                "Starting virtual camera"
            );
            let pipeline =
                VirtualCameraPipeline::new(self.format, self.output, self.device.as_deref())?;
            pipeline.start()?;
            self.pipeline = Some(pipeline);
            info!("Virtual camera started successfully");
        }
        self.pipeline
            .as_ref()
            .ok_or_else(|| PlaybackError::DeviceUnavailable("Virtual camera not started".into()))
    }
}

impl DeviceSink<Frame> for VirtualCameraSink {
    fn name(&self) -> &str {
        "virtual-camera"
    }

    fn write(&mut self, frame: &Frame) -> PlaybackResult<()> {
        let pipeline = self.ensure_started()?;
        let result = match pipeline.has_failed() {
            Some(message) => Err(PlaybackError::DeviceUnavailable(message)),
            None => pipeline.push_frame(frame),
        };
        if let Err(PlaybackError::DeviceUnavailable(ref message)) = result {
            warn!(error = %message, "Virtual camera write failed, dropping pipeline");
            self.pipeline = None;
        }
        result
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            debug!("Closing virtual camera");
            pipeline.stop();
        }
    }
}

impl Drop for VirtualCameraSink {
    fn drop(&mut self) {
        self.close();
    }
}
